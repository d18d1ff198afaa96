//! The transfer manager: queued transfers, per-storage exclusivity, chunked
//! workers with throttling, timeouts and cancellation.
//!
//! # Lifecycle
//!
//! 1. Create with `TransferManager::new(...)`.
//! 2. Call `start()` to spawn worker threads.
//! 3. `enqueue()` transfers; at most one per storage runs at a time.
//! 4. Call `shutdown()` to abort running transfers and join workers.
//!
//! Workers move bytes in bounded chunks so a throttle change or a
//! cancellation request takes effect within one chunk interval.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write as _};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use serde_json::Value;
use tracing::{debug, info, warn};

use printlink_fs::{Filesystem, WatchEvent, validate_name};
use printlink_io::StorageBackend;
use printlink_types::{
    Event, EventKind, EventSink, EventSource, TransferDirection, TransferId, TransferState,
};

use crate::error::{TransferError, TransferResult};
use crate::remote::RemoteStore;
use crate::transfer::{TransferShared, TransferSnapshot, TransferSpec};

/// Tuning knobs for the transfer manager.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of worker threads (also the cross-storage parallelism cap).
    pub workers: usize,
    /// Bytes moved per chunk.
    pub chunk_size: usize,
    /// A transfer with no progress for this long fails with `read_timeout`.
    pub inactivity_timeout: Duration,
    /// Minimum spacing of `TRANSFER_INFO` events, per transfer.
    pub progress_interval: Duration,
    /// Worker sleep when the queue is empty or a storage is busy.
    pub poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            chunk_size: 64 * 1024,
            inactivity_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Cancellation is observed at least this often while sleeping on the
/// throttle or a busy storage.
const CANCEL_SLICE: Duration = Duration::from_millis(250);

struct ManagerInner {
    config: TransferConfig,
    backend: Arc<dyn StorageBackend>,
    remote: Arc<dyn RemoteStore>,
    fs: Arc<Filesystem>,
    sink: Arc<dyn EventSink>,
    token: Mutex<Option<String>>,
    next_id: AtomicU32,
    pending: SegQueue<Arc<TransferShared>>,
    transfers: Mutex<HashMap<TransferId, Arc<TransferShared>>>,
    active_storages: Mutex<HashSet<String>>,
    shutdown: AtomicBool,
}

/// Concurrent file download/upload coordination.
pub struct TransferManager {
    inner: Arc<ManagerInner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TransferManager {
    /// Creates a manager. Workers are not yet running; call [`start`].
    ///
    /// [`start`]: TransferManager::start
    pub fn new(
        config: TransferConfig,
        backend: Arc<dyn StorageBackend>,
        remote: Arc<dyn RemoteStore>,
        fs: Arc<Filesystem>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        assert!(config.workers > 0, "worker count must be positive");
        assert!(config.chunk_size > 0, "chunk size must be positive");
        Self {
            inner: Arc::new(ManagerInner {
                config,
                backend,
                remote,
                fs,
                sink,
                token: Mutex::new(None),
                next_id: AtomicU32::new(1),
                pending: SegQueue::new(),
                transfers: Mutex::new(HashMap::new()),
                active_storages: Mutex::new(HashSet::new()),
                shutdown: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Supplies the Connect token used for authenticated endpoints.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.inner.token.lock().expect("token lock poisoned") = Some(token.into());
    }

    /// Spawns the worker threads.
    ///
    /// # Panics
    ///
    /// Panics if called more than once without an intervening `shutdown()`.
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        assert!(
            handles.is_empty(),
            "manager already started; call shutdown() first"
        );
        for worker_id in 0..self.inner.config.workers {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("plk-transfer-{worker_id}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn transfer worker");
            handles.push(handle);
        }
    }

    /// Queues a transfer, returning its id immediately.
    ///
    /// The virtual path must live on a mounted storage with a physical
    /// root, and its leaf name must validate.
    pub fn enqueue(&self, spec: TransferSpec) -> TransferResult<TransferId> {
        let components = printlink_fs::split_path(&spec.path);
        let (leaf, _) = components
            .split_last()
            .ok_or_else(|| TransferError::InvalidDestination(spec.path.clone()))?;
        validate_name(leaf).map_err(|_| TransferError::InvalidDestination(spec.path.clone()))?;
        let storage = components
            .first()
            .ok_or_else(|| TransferError::InvalidDestination(spec.path.clone()))?
            .to_string();
        if self.inner.fs.physical_path(&spec.path).is_none() {
            return Err(TransferError::InvalidDestination(spec.path.clone()));
        }
        if spec.direction.is_download() {
            // The destination's parent must already exist in the model.
            let parent: String = {
                let (_, ancestors) = components.split_last().expect("checked above");
                format!("/{}", ancestors.join("/"))
            };
            if !self.inner.fs.exists(&parent) {
                return Err(TransferError::InvalidDestination(spec.path.clone()));
            }
        } else if !self.inner.fs.exists(&spec.path) {
            // Uploads read an existing file.
            return Err(TransferError::InvalidDestination(spec.path.clone()));
        }

        let id = TransferId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(TransferShared::new(id, spec, storage));
        self.inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .insert(id, Arc::clone(&shared));
        self.inner.pending.push(shared);
        debug!(%id, "transfer enqueued");
        Ok(id)
    }

    /// Requests cancellation of one transfer.
    ///
    /// Terminal transfers are left untouched; unknown ids are an error.
    pub fn stop(&self, id: TransferId, reason: &str) -> TransferResult<()> {
        let shared = self
            .inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(TransferError::UnknownTransfer(id))?;
        if !shared.state().is_terminal() {
            shared.request_cancel(reason);
        }
        Ok(())
    }

    /// Requests cancellation of the active (or every pending) transfer.
    pub fn stop_all(&self, reason: &str) {
        for shared in self
            .inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .values()
        {
            if !shared.state().is_terminal() {
                shared.request_cancel(reason);
            }
        }
    }

    /// Aborts any non-terminal transfer targeting `path`, with `reason`.
    ///
    /// Wired to file deletion: deleting a download's destination mid-flight
    /// kills the download rather than racing it.
    pub fn abort_by_path(&self, path: &str, reason: &str) {
        for shared in self
            .inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .values()
        {
            if shared.spec.path == path && !shared.state().is_terminal() {
                shared.request_cancel(reason);
            }
        }
    }

    /// Changes a transfer's throttle at runtime.
    pub fn set_throttle(&self, id: TransferId, rate: Option<u64>) -> TransferResult<()> {
        let shared = self
            .inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(TransferError::UnknownTransfer(id))?;
        shared
            .throttle
            .lock()
            .expect("throttle lock poisoned")
            .set_rate(rate);
        Ok(())
    }

    /// Point-in-time view of one transfer.
    pub fn snapshot(&self, id: TransferId) -> Option<TransferSnapshot> {
        self.inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .get(&id)
            .map(|s| s.snapshot())
    }

    /// Snapshots of every non-terminal transfer, oldest first.
    pub fn active_snapshots(&self) -> Vec<TransferSnapshot> {
        let mut out: Vec<TransferSnapshot> = self
            .inner
            .transfers
            .lock()
            .expect("transfers lock poisoned")
            .values()
            .map(|s| s.snapshot())
            .filter(|s| !s.state.is_terminal())
            .collect();
        out.sort_by_key(|s| u32::from(s.id));
        out
    }

    /// Aborts everything and joins the workers. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.stop_all("shutdown");
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------
// Worker side
// ----------------------------------------------------------------------

fn worker_loop(inner: &Arc<ManagerInner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some(shared) = inner.pending.pop() else {
            thread::sleep(inner.config.poll_interval);
            continue;
        };

        if let Some(reason) = shared.cancel_requested() {
            finalize_cancelled(inner, &shared, &reason, false);
            continue;
        }

        // One transfer per storage at a time.
        {
            let mut active = inner
                .active_storages
                .lock()
                .expect("active-storage lock poisoned");
            if active.contains(&shared.storage) {
                drop(active);
                inner.pending.push(shared);
                thread::sleep(inner.config.poll_interval);
                continue;
            }
            active.insert(shared.storage.clone());
        }

        run_transfer(inner, &shared);

        inner
            .active_storages
            .lock()
            .expect("active-storage lock poisoned")
            .remove(&shared.storage);
    }
}

fn run_transfer(inner: &Arc<ManagerInner>, shared: &Arc<TransferShared>) {
    info!(id = %shared.id, direction = %shared.spec.direction, path = %shared.spec.path, "transfer starting");
    let result = match shared.spec.direction {
        TransferDirection::DownloadFromConnect | TransferDirection::DownloadFromUrl => {
            run_download(inner, shared)
        }
        TransferDirection::UploadToConnect => run_upload(inner, shared),
    };

    match result {
        Ok(()) => {
            shared.set_state(TransferState::Finished);
            info!(id = %shared.id, "transfer finished");
            emit_terminal(inner, shared, EventKind::TransferFinished, None);
        }
        Err(TransferError::Aborted(reason)) => {
            finalize_cancelled(inner, shared, &reason, true);
        }
        Err(err) => {
            shared.set_state(TransferState::Failed);
            warn!(id = %shared.id, %err, "transfer failed");
            let reason = match &err {
                TransferError::ReadTimeout => "read_timeout".to_string(),
                other => other.to_string(),
            };
            remove_part(inner, part_path(inner, shared));
            emit_terminal(inner, shared, EventKind::TransferAborted, Some(&reason));
        }
    }
}

fn finalize_cancelled(
    inner: &Arc<ManagerInner>,
    shared: &Arc<TransferShared>,
    reason: &str,
    cleanup_part: bool,
) {
    shared.set_state(TransferState::Aborted);
    info!(id = %shared.id, reason, "transfer aborted");
    if cleanup_part {
        remove_part(inner, part_path(inner, shared));
    }
    let kind = if reason == "stopped" {
        EventKind::TransferStopped
    } else {
        EventKind::TransferAborted
    };
    emit_terminal(inner, shared, kind, Some(reason));
}

fn part_path(inner: &Arc<ManagerInner>, shared: &Arc<TransferShared>) -> Option<PathBuf> {
    if !shared.spec.direction.is_download() {
        return None;
    }
    let physical = inner.fs.physical_path(&shared.spec.path)?;
    let leaf = physical.file_name()?.to_string_lossy().into_owned();
    Some(physical.with_file_name(format!(".{leaf}.part")))
}

fn remove_part(inner: &Arc<ManagerInner>, part: Option<PathBuf>) {
    if let Some(part) = part {
        match inner.backend.unlink(&part) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(part = %part.display(), %err, "part file cleanup failed"),
        }
    }
}

fn emit_terminal(
    inner: &Arc<ManagerInner>,
    shared: &Arc<TransferShared>,
    kind: EventKind,
    reason: Option<&str>,
) {
    let snap = shared.snapshot();
    let mut event = Event::new(kind, EventSource::Connect)
        .with_transfer(shared.id)
        .with_data("path", Value::from(snap.path.as_str()))
        .with_data("transferred", Value::from(snap.bytes_transferred));
    if let Some(command_id) = shared.spec.command_id {
        event = event.with_command(command_id);
    }
    if let Some(reason) = reason {
        event = event.with_reason(reason);
    }
    inner.sink.emit(event);
}

fn emit_progress(inner: &Arc<ManagerInner>, shared: &Arc<TransferShared>) {
    let snap = shared.snapshot();
    let mut event = Event::new(EventKind::TransferInfo, EventSource::Connect)
        .with_transfer(shared.id)
        .with_data("path", Value::from(snap.path.as_str()))
        .with_data("url", Value::from(snap.url.as_str()))
        .with_data("transferred", Value::from(snap.bytes_transferred))
        .with_data("to_print", Value::from(snap.to_print));
    if let Some(total) = snap.total_bytes {
        event = event.with_data("total", Value::from(total));
    }
    if let Some(progress) = snap.progress_percent {
        event = event.with_data("progress", Value::from((progress * 10.0).round() / 10.0));
    }
    if let Some(remaining) = snap.time_remaining {
        event = event.with_data("time_remaining", Value::from(remaining));
    }
    if let Some(command_id) = shared.spec.command_id {
        event = event.with_command(command_id);
    }
    inner.sink.emit(event);
}

/// Returns the cancellation reason, checking both per-transfer and global
/// shutdown flags.
fn cancelled(inner: &ManagerInner, shared: &TransferShared) -> Option<String> {
    if let Some(reason) = shared.cancel_requested() {
        return Some(reason);
    }
    if inner.shutdown.load(Ordering::SeqCst) {
        return Some("shutdown".to_string());
    }
    None
}

/// Sleeps `total`, waking every [`CANCEL_SLICE`] to observe cancellation.
fn sleep_observing_cancel(
    inner: &ManagerInner,
    shared: &TransferShared,
    total: Duration,
) -> Result<(), TransferError> {
    let deadline = Instant::now() + total;
    loop {
        if let Some(reason) = cancelled(inner, shared) {
            return Err(TransferError::Aborted(reason));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(CANCEL_SLICE));
    }
}

fn run_download(inner: &Arc<ManagerInner>, shared: &Arc<TransferShared>) -> TransferResult<()> {
    let physical = inner
        .fs
        .physical_path(&shared.spec.path)
        .ok_or_else(|| TransferError::InvalidDestination(shared.spec.path.clone()))?;
    let part = part_path(inner, shared)
        .ok_or_else(|| TransferError::InvalidDestination(shared.spec.path.clone()))?;

    let token = inner.token.lock().expect("token lock poisoned").clone();
    let stream = inner
        .remote
        .open_download(&shared.spec.url, token.as_deref())?;
    shared.set_total(stream.total_bytes);
    let mut reader = stream.reader;
    let mut writer = inner.backend.open_write(&part)?;

    shared.set_state(TransferState::Running);
    let mut buf = vec![0u8; inner.config.chunk_size];
    let mut last_info = Instant::now();

    loop {
        if let Some(reason) = cancelled(inner, shared) {
            return Err(TransferError::Aborted(reason));
        }

        let wait = shared
            .throttle
            .lock()
            .expect("throttle lock poisoned")
            .acquire(buf.len());
        if !wait.is_zero() {
            sleep_observing_cancel(inner, shared, wait)?;
        }

        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                writer.write_all(&buf[..n]).map_err(printlink_io::IoError::from)?;
                shared.record_progress(n as u64);
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                // Stall: give up only once the inactivity window elapses.
                if shared.idle_for().is_some_and(|d| d >= inner.config.inactivity_timeout) {
                    return Err(TransferError::ReadTimeout);
                }
                sleep_observing_cancel(inner, shared, inner.config.poll_interval)?;
            }
            Err(err) => return Err(TransferError::Remote(err.to_string())),
        }

        if shared.idle_for().is_some_and(|d| d >= inner.config.inactivity_timeout) {
            return Err(TransferError::ReadTimeout);
        }
        if last_info.elapsed() >= inner.config.progress_interval {
            emit_progress(inner, shared);
            last_info = Instant::now();
        }
    }

    // All bytes landed; make them durable and visible.
    shared.set_state(TransferState::Finishing);
    writer.sync()?;
    drop(writer);
    inner.backend.rename(&part, &physical)?;
    inner.backend.fsync_dir(&physical)?;
    if let Err(err) = inner
        .fs
        .apply_watch_event(&shared.storage, &WatchEvent::Created(physical))
    {
        warn!(id = %shared.id, %err, "model update after download failed");
    }
    Ok(())
}

fn run_upload(inner: &Arc<ManagerInner>, shared: &Arc<TransferShared>) -> TransferResult<()> {
    let physical = inner
        .fs
        .physical_path(&shared.spec.path)
        .ok_or_else(|| TransferError::InvalidDestination(shared.spec.path.clone()))?;

    let stat = inner.backend.stat(&physical)?;
    shared.set_total(Some(stat.size));
    let reader = inner.backend.open_read(&physical)?;

    shared.set_state(TransferState::Running);
    let body = Box::new(WorkerReader {
        inner: Arc::clone(inner),
        shared: Arc::clone(shared),
        reader,
        last_info: Instant::now(),
    });

    let token = inner.token.lock().expect("token lock poisoned").clone();
    inner
        .remote
        .upload(&shared.spec.url, token.as_deref(), body, Some(stat.size))
        .map_err(|err| match cancelled(inner, shared) {
            // Our own reader poisoned the request to observe cancellation.
            Some(reason) => TransferError::Aborted(reason),
            None => err,
        })?;
    Ok(())
}

/// Upload body reader applying throttle, cancellation and progress
/// accounting on every pull.
struct WorkerReader {
    inner: Arc<ManagerInner>,
    shared: Arc<TransferShared>,
    reader: Box<dyn Read + Send>,
    last_info: Instant,
}

impl Read for WorkerReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(reason) = cancelled(&self.inner, &self.shared) {
            return Err(std::io::Error::other(format!("cancelled: {reason}")));
        }

        let limit = buf.len().min(self.inner.config.chunk_size);
        let wait = self
            .shared
            .throttle
            .lock()
            .expect("throttle lock poisoned")
            .acquire(limit);
        if !wait.is_zero() {
            if sleep_observing_cancel(&self.inner, &self.shared, wait).is_err() {
                return Err(std::io::Error::other("cancelled"));
            }
        }

        let n = self.reader.read(&mut buf[..limit])?;
        if n > 0 {
            self.shared.record_progress(n as u64);
        }
        if self.last_info.elapsed() >= self.inner.config.progress_interval {
            emit_progress(&self.inner, &self.shared);
            self.last_info = Instant::now();
        }
        Ok(n)
    }
}
