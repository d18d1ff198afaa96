//! I/O error types.

use std::path::PathBuf;

/// Errors from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying OS I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Path does not exist.
    #[error("path not found: {path}")]
    NotFound { path: PathBuf },

    /// Free-space query is not supported on this platform or mount.
    #[error("space query unsupported for {path}")]
    SpaceUnsupported { path: PathBuf },
}

impl IoError {
    /// True when the underlying cause is a missing path.
    pub fn is_not_found(&self) -> bool {
        match self {
            IoError::NotFound { .. } => true,
            IoError::Io { source } => source.kind() == std::io::ErrorKind::NotFound,
            IoError::SpaceUnsupported { .. } => false,
        }
    }
}
