//! End-to-end transfer manager tests over a temp directory and a scripted
//! remote.

use std::fs;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use printlink_fs::Filesystem;
use printlink_io::StdBackend;
use printlink_transfer::{
    DownloadStream, RemoteStore, TransferConfig, TransferManager, TransferResult, TransferSpec,
};
use printlink_types::{
    CommandId, Event, EventKind, EventSink, StorageType, TransferDirection, TransferState,
};

#[derive(Default)]
struct CapturedEvents(Mutex<Vec<Event>>);

impl EventSink for CapturedEvents {
    fn emit(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

impl CapturedEvents {
    fn kinds(&self) -> Vec<EventKind> {
        self.0.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn find(&self, kind: EventKind) -> Option<Event> {
        self.0.lock().unwrap().iter().find(|e| e.kind == kind).cloned()
    }
}

/// Reader yielding scripted chunks with optional per-chunk delay, then EOF
/// or an endless stall.
struct ScriptedReader {
    chunks: Vec<Vec<u8>>,
    delay: Duration,
    stall_at_end: bool,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.chunks.is_empty() {
            if self.stall_at_end {
                // Emulate a silent socket: the worker sees a timeout-ish
                // error and keeps the inactivity clock running.
                std::thread::sleep(Duration::from_millis(10));
                return Err(std::io::Error::from(std::io::ErrorKind::WouldBlock));
            }
            return Ok(0);
        }
        std::thread::sleep(self.delay);
        let chunk = self.chunks.remove(0);
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }
}

struct StubRemote {
    chunks: Vec<Vec<u8>>,
    delay: Duration,
    stall_at_end: bool,
    advertise_total: bool,
    uploads: Mutex<Vec<Vec<u8>>>,
    downloads_opened: AtomicUsize,
}

impl StubRemote {
    fn serving(content: &[u8]) -> Self {
        Self {
            chunks: content.chunks(32).map(<[u8]>::to_vec).collect(),
            delay: Duration::ZERO,
            stall_at_end: false,
            advertise_total: true,
            uploads: Mutex::new(Vec::new()),
            downloads_opened: AtomicUsize::new(0),
        }
    }
}

impl RemoteStore for StubRemote {
    fn open_download(&self, _url: &str, _token: Option<&str>) -> TransferResult<DownloadStream> {
        self.downloads_opened.fetch_add(1, Ordering::SeqCst);
        let total: usize = self.chunks.iter().map(Vec::len).sum();
        Ok(DownloadStream {
            reader: Box::new(ScriptedReader {
                chunks: self.chunks.clone(),
                delay: self.delay,
                stall_at_end: self.stall_at_end,
            }),
            total_bytes: self.advertise_total.then_some(total as u64),
        })
    }

    fn upload(
        &self,
        _url: &str,
        _token: Option<&str>,
        mut body: Box<dyn Read + Send>,
        _total_bytes: Option<u64>,
    ) -> TransferResult<()> {
        let mut received = Vec::new();
        body.read_to_end(&mut received)
            .map_err(|e| printlink_transfer::TransferError::Remote(e.to_string()))?;
        self.uploads.lock().unwrap().push(received);
        Ok(())
    }
}

struct Rig {
    manager: TransferManager,
    events: Arc<CapturedEvents>,
    fs: Arc<Filesystem>,
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

fn rig(remote: StubRemote, config: TransferConfig) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let backend: Arc<StdBackend> = Arc::new(StdBackend::new());
    let events = Arc::new(CapturedEvents::default());
    let fs = Arc::new(Filesystem::new(backend.clone(), events.clone()));
    fs.mount_path("usb", &root, StorageType::Usb, false).unwrap();

    let manager = TransferManager::new(config, backend, Arc::new(remote), fs.clone(), events.clone());
    manager.start();
    Rig {
        manager,
        events,
        fs,
        _dir: dir,
        root,
    }
}

fn quick_config() -> TransferConfig {
    TransferConfig {
        workers: 2,
        chunk_size: 32,
        inactivity_timeout: Duration::from_millis(300),
        progress_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
    }
}

fn download_spec(path: &str) -> TransferSpec {
    TransferSpec {
        direction: TransferDirection::DownloadFromUrl,
        url: "https://example.com/file.gcode".into(),
        path: path.into(),
        command_id: Some(CommandId::new(77)),
        to_print: false,
        throttle: None,
    }
}

fn wait_terminal(rig: &Rig, id: printlink_types::TransferId) -> TransferState {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let state = rig.manager.snapshot(id).unwrap().state;
        if state.is_terminal() {
            return state;
        }
        assert!(Instant::now() < deadline, "transfer did not finish in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn download_happy_path() {
    let content = vec![7u8; 300];
    let r = rig(StubRemote::serving(&content), quick_config());

    let id = r.manager.enqueue(download_spec("/usb/part.gcode")).unwrap();
    assert_eq!(wait_terminal(&r, id), TransferState::Finished);

    // Bytes landed and the part file is gone.
    assert_eq!(fs::read(r.root.join("part.gcode")).unwrap(), content);
    assert!(!r.root.join(".part.gcode.part").exists());

    // The model saw the file before the finish event.
    assert!(r.fs.exists("/usb/part.gcode"));
    let kinds = r.events.kinds();
    let file_changed = kinds.iter().position(|k| *k == EventKind::FileChanged).unwrap();
    let finished = kinds.iter().position(|k| *k == EventKind::TransferFinished).unwrap();
    assert!(file_changed < finished, "FILE_CHANGED must precede TRANSFER_FINISHED");

    // Terminal event echoes the initiating command.
    let event = r.events.find(EventKind::TransferFinished).unwrap();
    assert_eq!(event.command_id, Some(CommandId::new(77)));
    assert_eq!(event.transfer_id, Some(id));
}

#[test]
fn progress_snapshot_is_monotone() {
    let content = vec![1u8; 4096];
    let mut remote = StubRemote::serving(&content);
    remote.delay = Duration::from_millis(2);
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/slow.gcode")).unwrap();
    let mut last = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snap = r.manager.snapshot(id).unwrap();
        assert!(snap.bytes_transferred >= last, "progress went backwards");
        if let Some(total) = snap.total_bytes {
            assert!(snap.bytes_transferred <= total);
        }
        last = snap.bytes_transferred;
        if snap.state.is_terminal() {
            break;
        }
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(last, 4096);
}

#[test]
fn stalled_download_times_out() {
    let mut remote = StubRemote::serving(&[9u8; 100]);
    remote.stall_at_end = true;
    remote.advertise_total = false;
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/stall.gcode")).unwrap();
    assert_eq!(wait_terminal(&r, id), TransferState::Failed);

    let event = r.events.find(EventKind::TransferAborted).unwrap();
    assert_eq!(event.reason.as_deref(), Some("read_timeout"));

    // No partial file in the model or the listing.
    assert!(!r.fs.exists("/usb/stall.gcode"));
    assert!(
        r.fs.flat_info().iter().all(|e| !e.path.contains("stall")),
        "partial download must not be listed"
    );
    assert!(!r.root.join("stall.gcode").exists());
    assert!(!r.root.join(".stall.gcode.part").exists());
}

#[test]
fn stop_aborts_running_transfer() {
    let mut remote = StubRemote::serving(&vec![3u8; 100_000]);
    remote.delay = Duration::from_millis(5);
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/big.gcode")).unwrap();
    // Let it get going, then stop it.
    std::thread::sleep(Duration::from_millis(50));
    r.manager.stop(id, "stopped").unwrap();

    assert_eq!(wait_terminal(&r, id), TransferState::Aborted);
    let event = r.events.find(EventKind::TransferStopped).unwrap();
    assert_eq!(event.reason.as_deref(), Some("stopped"));
    assert!(!r.root.join("big.gcode").exists());
}

#[test]
fn abort_by_path_reports_deleted() {
    let mut remote = StubRemote::serving(&vec![3u8; 100_000]);
    remote.delay = Duration::from_millis(5);
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/doomed.gcode")).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    r.manager.abort_by_path("/usb/doomed.gcode", "deleted");

    assert_eq!(wait_terminal(&r, id), TransferState::Aborted);
    let event = r.events.find(EventKind::TransferAborted).unwrap();
    assert_eq!(event.reason.as_deref(), Some("deleted"));
}

#[test]
fn one_transfer_per_storage_at_a_time() {
    let mut remote = StubRemote::serving(&vec![5u8; 2048]);
    remote.delay = Duration::from_millis(3);
    let r = rig(remote, quick_config());

    let a = r.manager.enqueue(download_spec("/usb/a.gcode")).unwrap();
    let b = r.manager.enqueue(download_spec("/usb/b.gcode")).unwrap();

    // While either is running, never two Running on the same storage.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snaps = r.manager.active_snapshots();
        let running = snaps
            .iter()
            .filter(|s| s.state == TransferState::Running)
            .count();
        assert!(running <= 1, "two transfers running on one storage");
        if snaps.is_empty() {
            break;
        }
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(wait_terminal(&r, a), TransferState::Finished);
    assert_eq!(wait_terminal(&r, b), TransferState::Finished);
}

#[test]
fn transfer_ids_are_monotone() {
    let r = rig(StubRemote::serving(b"x"), quick_config());
    let a = r.manager.enqueue(download_spec("/usb/a.gcode")).unwrap();
    let b = r.manager.enqueue(download_spec("/usb/b.gcode")).unwrap();
    assert!(u32::from(b) > u32::from(a));
}

#[test]
fn enqueue_rejects_bad_destinations() {
    let r = rig(StubRemote::serving(b"x"), quick_config());
    // Unmounted storage.
    assert!(r.manager.enqueue(download_spec("/sd/a.gcode")).is_err());
    // Invalid leaf name.
    assert!(r.manager.enqueue(download_spec("/usb/a:b.gcode")).is_err());
    // Missing parent folder.
    assert!(r.manager.enqueue(download_spec("/usb/nodir/a.gcode")).is_err());
}

#[test]
fn upload_streams_file_contents() {
    let remote = StubRemote::serving(b"");
    let r = rig(remote, quick_config());
    fs::write(r.root.join("send.gcode"), vec![6u8; 1000]).unwrap();
    // Rescan so the model knows the file.
    r.fs.unmount("usb").unwrap();
    r.fs.mount_path("usb", &r.root, StorageType::Usb, false).unwrap();

    let id = r
        .manager
        .enqueue(TransferSpec {
            direction: TransferDirection::UploadToConnect,
            url: "https://connect.example/api/files".into(),
            path: "/usb/send.gcode".into(),
            command_id: None,
            to_print: false,
            throttle: None,
        })
        .unwrap();
    assert_eq!(wait_terminal(&r, id), TransferState::Finished);

    let snap = r.manager.snapshot(id).unwrap();
    assert_eq!(snap.bytes_transferred, 1000);
    assert_eq!(snap.total_bytes, Some(1000));
}

#[test]
fn set_throttle_is_visible_in_snapshots() {
    let mut remote = StubRemote::serving(&vec![2u8; 50_000]);
    remote.delay = Duration::from_millis(2);
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/t.gcode")).unwrap();
    r.manager.set_throttle(id, Some(1_000_000)).unwrap();
    assert_eq!(r.manager.snapshot(id).unwrap().throttle, Some(1_000_000));
    r.manager.set_throttle(id, None).unwrap();
    assert_eq!(r.manager.snapshot(id).unwrap().throttle, None);
    wait_terminal(&r, id);
}

#[test]
fn shutdown_aborts_and_joins() {
    let mut remote = StubRemote::serving(&vec![3u8; 1_000_000]);
    remote.delay = Duration::from_millis(10);
    let r = rig(remote, quick_config());

    let id = r.manager.enqueue(download_spec("/usb/never.gcode")).unwrap();
    std::thread::sleep(Duration::from_millis(40));
    r.manager.shutdown();

    let state = r.manager.snapshot(id).unwrap().state;
    assert!(state.is_terminal(), "shutdown must terminate transfers");
    // Shutdown twice is harmless.
    r.manager.shutdown();
}

#[test]
fn transfer_info_events_are_coalesced() {
    let mut remote = StubRemote::serving(&vec![4u8; 20_000]);
    remote.delay = Duration::from_millis(1);
    let mut config = quick_config();
    config.progress_interval = Duration::from_millis(50);
    let r = rig(remote, config);

    let id = r.manager.enqueue(download_spec("/usb/c.gcode")).unwrap();
    let started = Instant::now();
    wait_terminal(&r, id);
    let elapsed = started.elapsed();

    let info_count = r
        .events
        .kinds()
        .iter()
        .filter(|k| **k == EventKind::TransferInfo)
        .count();
    // At most one per interval, plus scheduling slack.
    let max_expected = elapsed.as_millis() / 50 + 2;
    assert!(
        info_count as u128 <= max_expected,
        "{info_count} TRANSFER_INFO events in {elapsed:?}"
    );
}
