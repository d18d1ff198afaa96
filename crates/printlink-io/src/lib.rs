//! # printlink-io: Storage Backend Abstraction for Printlink
//!
//! This crate provides a trait-based abstraction over physical file I/O,
//! so the in-memory filesystem model and the transfer manager never touch
//! `std::fs` directly:
//!
//! - **`StdBackend`** (default): standard `std::fs` operations with
//!   `statvfs`-based free-space queries on Unix
//! - **Test doubles**: the trait is object-safe, so tests inject in-memory
//!   or fault-injecting backends
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────┐
//! │  printlink-fs / -transfer     │
//! │  (use StorageBackend trait)   │
//! └──────────────┬────────────────┘
//!                │
//! ┌──────────────┴────────────────┐
//! │         printlink-io          │
//! │   ┌──────────┐  ┌──────────┐  │
//! │   │   Std    │  │  test    │  │
//! │   │ Backend  │  │ doubles  │  │
//! │   └──────────┘  └──────────┘  │
//! └───────────────────────────────┘
//! ```

mod backend;
mod error;
mod std_backend;

pub use backend::{DirEntry, FileStat, SpaceInfo, StorageBackend, SyncWrite};
pub use error::IoError;
pub use std_backend::StdBackend;
