//! Physical filesystem watching.
//!
//! The SDK does not bind to a notification API. Embedders implement
//! [`FilesystemWatcher`] over inotify, kqueue, `ReadDirectoryChangesW` or
//! whatever the platform offers, and pump observed events into
//! [`Filesystem::apply_watch_event`](crate::Filesystem::apply_watch_event).
//! A [`PollingWatcher`] is provided for media without notification support
//! (SD cards behind USB bridges, network mounts).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use printlink_io::{FileStat, StorageBackend};

/// One observed physical change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A path appeared.
    Created(PathBuf),
    /// A path's content or metadata changed.
    Modified(PathBuf),
    /// A path vanished.
    Deleted(PathBuf),
}

impl WatchEvent {
    /// The physical path the event refers to.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(p) | WatchEvent::Modified(p) | WatchEvent::Deleted(p) => p,
        }
    }
}

/// Source of physical change observations.
pub trait FilesystemWatcher: Send {
    /// Drains pending observations. Never blocks.
    fn poll(&mut self) -> Vec<WatchEvent>;
}

/// Snapshot-diffing watcher for media without notification support.
///
/// Each `poll` walks the watched root through the backend and diffs against
/// the previous snapshot. Cost is proportional to tree size; callers pick
/// the poll cadence.
pub struct PollingWatcher {
    backend: Arc<dyn StorageBackend>,
    root: PathBuf,
    snapshot: HashMap<PathBuf, FileStat>,
    primed: bool,
}

impl PollingWatcher {
    /// Creates a watcher over `root`. The first `poll` primes the snapshot
    /// and reports nothing, so pre-existing files do not storm the queue.
    pub fn new(backend: Arc<dyn StorageBackend>, root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            root: root.into(),
            snapshot: HashMap::new(),
            primed: false,
        }
    }

    fn walk(&self, dir: &Path, out: &mut HashMap<PathBuf, FileStat>) {
        let entries = match self.backend.listdir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "watch walk failed");
                return;
            }
        };
        for entry in entries {
            let path = dir.join(&entry.name);
            if entry.stat.is_dir {
                self.walk(&path, out);
            }
            out.insert(path, entry.stat);
        }
    }
}

impl FilesystemWatcher for PollingWatcher {
    fn poll(&mut self) -> Vec<WatchEvent> {
        let mut current = HashMap::new();
        self.walk(&self.root.clone(), &mut current);

        if !self.primed {
            self.primed = true;
            self.snapshot = current;
            return Vec::new();
        }

        let mut events = Vec::new();
        for (path, stat) in &current {
            match self.snapshot.get(path) {
                None => events.push(WatchEvent::Created(path.clone())),
                Some(old) if old != stat => events.push(WatchEvent::Modified(path.clone())),
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                events.push(WatchEvent::Deleted(path.clone()));
            }
        }
        // Parents report after their children on delete, before on create;
        // sorting by path depth gives consumers a consistent order.
        events.sort_by_key(|e| (e.path().components().count(), e.path().to_path_buf()));
        self.snapshot = current;
        events
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use printlink_io::StdBackend;

    use super::*;

    fn watcher_over(dir: &Path) -> PollingWatcher {
        PollingWatcher::new(Arc::new(StdBackend::new()), dir)
    }

    #[test]
    fn first_poll_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pre.gcode"), b"x").unwrap();
        let mut w = watcher_over(dir.path());
        assert!(w.poll().is_empty());
    }

    #[test]
    fn detects_create_modify_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher_over(dir.path());
        w.poll();

        let file = dir.path().join("a.gcode");
        fs::write(&file, b"one").unwrap();
        let events = w.poll();
        assert_eq!(events, vec![WatchEvent::Created(file.clone())]);

        fs::write(&file, b"different length").unwrap();
        let events = w.poll();
        assert_eq!(events, vec![WatchEvent::Modified(file.clone())]);

        fs::remove_file(&file).unwrap();
        let events = w.poll();
        assert_eq!(events, vec![WatchEvent::Deleted(file)]);
    }

    #[test]
    fn walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher_over(dir.path());
        w.poll();

        fs::create_dir(dir.path().join("jobs")).unwrap();
        fs::write(dir.path().join("jobs/b.gcode"), b"x").unwrap();
        let events = w.poll();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], WatchEvent::Created(p) if p.ends_with("jobs")));
        assert!(matches!(&events[1], WatchEvent::Created(p) if p.ends_with("b.gcode")));
    }

    #[test]
    fn steady_state_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.gcode"), b"x").unwrap();
        let mut w = watcher_over(dir.path());
        w.poll();
        assert!(w.poll().is_empty());
        assert!(w.poll().is_empty());
    }
}
