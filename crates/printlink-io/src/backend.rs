//! Storage backend trait.
//!
//! The [`StorageBackend`] trait abstracts the physical I/O the SDK performs
//! against attached media. The in-memory filesystem model stays authoritative
//! for emitted listings; this seam only moves bytes and metadata. It exists to
//! enable:
//! - Standard `std::fs` I/O (default)
//! - In-memory and fault-injecting backends in tests
//! - Platform-specific media drivers in embedders

use std::io::{Read, Write};
use std::path::Path;

use crate::IoError;

/// Metadata of one path, as reported by the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes; 0 for folders.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub m_timestamp: i64,
    /// Whether the path is a folder.
    pub is_dir: bool,
    /// Whether the path is writable.
    pub read_only: bool,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Bare name within the directory.
    pub name: String,
    /// Metadata of the entry.
    pub stat: FileStat,
}

/// Free/total space of the medium backing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    /// Bytes available to the SDK.
    pub free: u64,
    /// Total capacity in bytes.
    pub total: u64,
}

/// A writable file that can be flushed all the way to the medium.
pub trait SyncWrite: Write + Send {
    /// Flushes data and metadata to the medium (fsync or equivalent).
    fn sync(&mut self) -> Result<(), IoError>;
}

/// Abstraction over physical file I/O.
///
/// All methods are synchronous; transfer workers run them on their own
/// threads and apply throttling between chunks themselves.
pub trait StorageBackend: Send + Sync {
    /// Opens a file for reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, IoError>;

    /// Opens (creating or truncating) a file for writing.
    fn open_write(&self, path: &Path) -> Result<Box<dyn SyncWrite>, IoError>;

    /// Returns metadata for a path.
    fn stat(&self, path: &Path) -> Result<FileStat, IoError>;

    /// Removes a file.
    fn unlink(&self, path: &Path) -> Result<(), IoError>;

    /// Atomically renames a file within one medium.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), IoError>;

    /// Creates a directory. Parent must exist.
    fn mkdir(&self, path: &Path) -> Result<(), IoError>;

    /// Removes an empty directory.
    fn rmdir(&self, path: &Path) -> Result<(), IoError>;

    /// Lists a directory, unordered.
    fn listdir(&self, path: &Path) -> Result<Vec<DirEntry>, IoError>;

    /// Returns free/total space of the medium backing `path`.
    fn statvfs(&self, path: &Path) -> Result<SpaceInfo, IoError>;

    /// Flushes directory metadata for `path`'s parent to the medium.
    ///
    /// Called after a transfer lands so a power cut cannot orphan the entry.
    fn fsync_dir(&self, path: &Path) -> Result<(), IoError>;
}
