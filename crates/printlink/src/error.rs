//! SDK error types.

use thiserror::Error;

use printlink_fs::FsError;
use printlink_transfer::TransferError;
use printlink_types::TransitionError;

/// Result type for SDK operations.
pub type SdkResult<T> = Result<T, SdkError>;

/// Errors surfaced by the SDK core.
///
/// Producer-context APIs return these synchronously; the communication loop
/// never exits on one, it converts them into `FAILED` events or condition
/// updates and carries on.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The service could not be reached at the transport level.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The service answered with a non-success status.
    #[error("server returned {status}: {message}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Server-provided error message, possibly empty.
        message: String,
    },

    /// The printer has no token and the operation needs one.
    #[error("printer is not registered")]
    Unregistered,

    /// The service terminally refused the registration code.
    #[error("registration rejected by the service")]
    RegistrationRejected,

    /// A token is already set; it may be set exactly once.
    #[error("token is already set")]
    TokenAlreadySet,

    /// `server_url` is not configured.
    #[error("server url is not configured")]
    NoServerUrl,

    /// The supplied configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A command was refused (busy, unknown kind, malformed args).
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// A user handler returned an error.
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    /// A forbidden printer state transition was requested.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// Transfer operation failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}
