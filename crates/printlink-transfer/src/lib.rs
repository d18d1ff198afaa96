//! # printlink-transfer: File Transfers for the Printlink SDK
//!
//! Downloads land next to their destination as a hidden `.name.part` file,
//! are fsynced, renamed into place, and only then reported; a power cut
//! never leaves a half-written g-code in a listing. Uploads stream the
//! source file through a throttling reader. At most one transfer runs per
//! storage; the rest wait in an unbounded queue.
//!
//! # Lifecycle
//!
//! ```text
//! ENQUEUED ──▶ RUNNING ──▶ FINISHING ──▶ FINISHED
//!     │           │
//!     └───────────┴──────▶ ABORTED | FAILED
//! ```
//!
//! Cancellation (shutdown, `STOP_TRANSFER`, destination deleted) is
//! observed between chunks, within 250 ms.

mod error;
mod manager;
mod remote;
mod throttle;
mod transfer;

pub use error::{TransferError, TransferResult};
pub use manager::{TransferConfig, TransferManager};
pub use remote::{DownloadStream, RemoteStore, UreqRemote};
pub use throttle::Throttle;
pub use transfer::{TransferSnapshot, TransferSpec};
