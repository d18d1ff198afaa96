//! # printlink-fs: Virtual Filesystem for the Printlink SDK
//!
//! A tree model of mounted storages. The model is authoritative for every
//! listing emitted to the service; physical I/O is delegated to the
//! [`StorageBackend`](printlink_io::StorageBackend) seam. Nodes live in an
//! index-based arena (parent and children are indices, no ownership
//! cycles).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  Filesystem                   │
//! │  ┌────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │ arena  │  │ metadata │  │ name rules / │   │
//! │  │  tree  │  │  cache   │  │ hidden filter│   │
//! │  └────────┘  └──────────┘  └──────────────┘   │
//! └───────┬──────────────┬────────────────────────┘
//!         │              │
//!   StorageBackend   EventSink (MEDIUM_*, FILE_CHANGED)
//! ```
//!
//! Watch plumbing is abstract: implement
//! [`FilesystemWatcher`] for the platform and pump its events into
//! [`Filesystem::apply_watch_event`].

mod arena;
mod cache;
mod error;
mod name;
mod tree;
mod watcher;

pub use arena::{Node, NodeKind, StorageMeta};
pub use cache::{MetadataCache, MetadataExtractor, MetadataRecord};
pub use error::{FsError, FsResult};
pub use name::{
    FORBIDDEN_CHARS, GCODE_EXTENSIONS, MAX_NAME_BYTES, is_gcode, is_hidden, split_path,
    validate_name,
};
pub use tree::{FileTree, Filesystem, FlatEntry, NodeInfo, StorageSummary};
pub use watcher::{FilesystemWatcher, PollingWatcher, WatchEvent};
