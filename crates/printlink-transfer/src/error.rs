//! Transfer error types.

use thiserror::Error;

use printlink_types::TransferId;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors from the transfer manager.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The remote side refused or broke the connection.
    #[error("remote error: {0}")]
    Remote(String),

    /// No bytes moved within the inactivity window.
    #[error("no progress within the inactivity window")]
    ReadTimeout,

    /// The transfer was cancelled.
    #[error("transfer aborted: {0}")]
    Aborted(String),

    /// The destination path does not map to a writable storage.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// No transfer with this id exists.
    #[error("unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    /// Physical I/O failed.
    #[error(transparent)]
    Io(#[from] printlink_io::IoError),
}
