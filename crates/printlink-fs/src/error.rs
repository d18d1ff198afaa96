//! Filesystem error types.

use thiserror::Error;

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors from the virtual filesystem.
#[derive(Debug, Error)]
pub enum FsError {
    /// A storage with this name is already mounted.
    #[error("storage already mounted: {0}")]
    AlreadyMounted(String),

    /// No storage with this name is mounted.
    #[error("storage not mounted: {0}")]
    NotMounted(String),

    /// The path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The parent of the path does not exist.
    #[error("parent path not found: {0}")]
    PathNotFound(String),

    /// A path component fails name validation.
    #[error("invalid name {name:?}: {reason}")]
    NameInvalid {
        /// The offending component.
        name: String,
        /// What rule it violates.
        reason: &'static str,
    },

    /// The folder has children and `force` was not given.
    #[error("folder not empty: {0}")]
    NotEmpty(String),

    /// The node or its storage is read-only.
    #[error("read-only: {0}")]
    ReadOnly(String),

    /// A folder operation was attempted on a file.
    #[error("not a folder: {0}")]
    NotAFolder(String),

    /// A file operation was attempted on a folder.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Physical I/O failed.
    #[error(transparent)]
    Io(#[from] printlink_io::IoError),
}
