//! # Printlink
//!
//! Device-side SDK linking a 3D printer to the Connect cloud service.
//!
//! The device pushes telemetry over HTTPS; the service replies with
//! commands embedded in telemetry responses; the device answers with
//! command results and asynchronous events, moves g-code files in both
//! directions, and exposes a virtual filesystem view of attached storage.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           Printer                             │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐  │
//! │  │telemetry │ → │ EventQueue│ → │   loop   │ → │ Connect   │  │
//! │  │   slot   │   │ (bounded) │   │ (1 thread│   │ (HTTPS)   │  │
//! │  └──────────┘   └───────────┘   └──────────┘   └───────────┘  │
//! │        ▲               ▲              │ commands              │
//! │  ┌─────┴─────┐   ┌─────┴─────┐   ┌────▼─────┐                 │
//! │  │Filesystem │   │ Transfer  │   │ handler  │                 │
//! │  │  (model)  │   │  manager  │   │  thread  │                 │
//! │  └───────────┘   └───────────┘   └──────────┘                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three execution contexts share one `Printer`:
//! - **the loop context** ([`Printer::run_loop`], one dedicated thread) owns
//!   the transport and is the only socket writer;
//! - **producer contexts** (any thread) feed [`Printer::telemetry`],
//!   [`Printer::set_state`], [`Printer::emit_event`] and the filesystem;
//! - **the handler context** (one thread) pumps [`Printer::command`] to run
//!   registered command handlers.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use printlink::{EventQueue, Printer, QueueSink};
//! use printlink_config::ConfigLoader;
//! use printlink_fs::Filesystem;
//! use printlink_io::StdBackend;
//!
//! let config = ConfigLoader::new().load()?;
//! let queue = Arc::new(EventQueue::default());
//! let sink = Arc::new(QueueSink::new(queue.clone()));
//! let fs = Arc::new(Filesystem::new(Arc::new(StdBackend::new()), sink));
//! fs.mount_path("usb", "/media/usb0".as_ref(), printlink_types::StorageType::Usb, false)?;
//!
//! let printer = Printer::builder(config)
//!     .with_queue(queue)
//!     .with_filesystem(fs)
//!     .build()?;
//!
//! // Registration (first boot only):
//! let code = printer.register()?;           // show the code to the user
//! // ... poll printer.get_token(&code) until Some(token) ...
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| printer.run_loop());
//!     s.spawn(|| loop {
//!         if !printer.command() {
//!             std::thread::sleep(std::time::Duration::from_millis(50));
//!         }
//!     });
//! });
//! ```

mod clock;
mod command;
mod condition;
mod error;
mod info;
mod printer;
mod queue;
mod transport;

pub use clock::{Clock, ManualClock, SKEW_THRESHOLD, SkewDetector, SystemClock};
pub use command::{CommandDispatcher, CommandHandler, CommandInstance, HandlerOutcome, Offer};
pub use condition::{ConditionSnapshot, ConditionTree};
pub use error::{SdkError, SdkResult};
pub use info::SDK_VERSION;
pub use printer::{Printer, PrinterBuilder};
pub use queue::{DEFAULT_CAPACITY, EventQueue, QueueSink};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, UreqTransport};

// Re-export the core types embedders touch constantly.
pub use printlink_types::{
    Command, CommandId, CommandKind, CommandPayload, CommandState, Event, EventKind, EventSink,
    EventSource, PrinterState, PrinterType, StateSource, Telemetry, Timestamp, TransferId,
};
