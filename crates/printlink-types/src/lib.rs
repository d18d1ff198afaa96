//! # printlink-types: Core types for the Printlink SDK
//!
//! This crate contains shared types used across the Printlink SDK:
//! - Entity IDs ([`CommandId`], [`TransferId`])
//! - Temporal types ([`Timestamp`])
//! - Printer identity and state ([`PrinterType`], [`PrinterState`])
//! - The event model ([`Event`], [`EventKind`], [`EventSource`], [`EventSink`])
//! - The telemetry slot record ([`Telemetry`])
//! - Commands and their typed payloads ([`Command`], [`CommandPayload`])
//! - Transfer lifecycle types ([`TransferDirection`], [`TransferState`])

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

mod command;
mod event;
mod state;
mod telemetry;
mod transfer;

pub use command::{Command, CommandKind, CommandParseError, CommandPayload, CommandState};
pub use event::{Event, EventKind, EventSink, EventSource, FileChangeKind};
pub use state::{PrinterState, StateSource, TransitionError, UnknownState};
pub use telemetry::Telemetry;
pub use transfer::{TransferDirection, TransferState};

// ============================================================================
// Entity IDs - All Copy (cheap 4-byte values)
// ============================================================================

/// Identifier of a Connect-issued command.
///
/// The service assigns these; the device echoes them on every event that
/// belongs to the command's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(u32);

impl CommandId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CommandId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<CommandId> for u32 {
    fn from(id: CommandId) -> Self {
        id.0
    }
}

/// Identifier of a file transfer.
///
/// Assigned by the device, monotonically increasing within a process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TransferId(u32);

impl TransferId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TransferId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<TransferId> for u32 {
    fn from(id: TransferId) -> Self {
        id.0
    }
}

// ============================================================================
// Timestamp - Copy (8-byte signed seconds, Y2038-safe on 32-bit hosts)
// ============================================================================

/// Wall-clock timestamp in whole seconds since the Unix epoch.
///
/// Stored as a signed 64-bit value so 32-bit hosts survive 2038.
///
/// # Examples
///
/// ```
/// # use printlink_types::Timestamp;
/// let t = Timestamp::from_secs(1_700_000_000);
/// assert_eq!(t.as_secs(), 1_700_000_000);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from seconds since the Unix epoch.
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Returns the timestamp as seconds since the Unix epoch.
    pub fn as_secs(&self) -> i64 {
        self.0
    }

    /// Creates a timestamp for the current wall-clock time.
    ///
    /// Clamps to the epoch if the system clock is before 1970.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_secs() as i64),
            Err(_) => Self::EPOCH,
        }
    }

    /// Returns this timestamp advanced by `secs` seconds, saturating.
    pub fn saturating_add_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(t: Timestamp) -> Self {
        t.0
    }
}

// ============================================================================
// Printer identity
// ============================================================================

/// The printer model this SDK instance speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterType {
    /// Bed-slinger with an 8-bit board.
    Mk3,
    /// Bed-slinger with a 32-bit board.
    Mk4,
    /// Compact cantilever model.
    Mini,
    /// CoreXY model.
    Core,
}

impl PrinterType {
    /// Wire identifier sent in the `Printer-Type` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterType::Mk3 => "MK3",
            PrinterType::Mk4 => "MK4",
            PrinterType::Mini => "MINI",
            PrinterType::Core => "CORE",
        }
    }

    /// Whether this model derives its fingerprint as `SHA256_HEX(serial)`.
    ///
    /// Newer models carry a factory-provisioned fingerprint instead.
    pub fn sha256_fingerprint(&self) -> bool {
        matches!(self, PrinterType::Mk3 | PrinterType::Mini)
    }
}

impl Display for PrinterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrinterType {
    type Err = UnknownPrinterType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MK3" => Ok(PrinterType::Mk3),
            "MK4" => Ok(PrinterType::Mk4),
            "MINI" => Ok(PrinterType::Mini),
            "CORE" => Ok(PrinterType::Core),
            other => Err(UnknownPrinterType(other.to_string())),
        }
    }
}

/// Printer model name not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown printer type: {0}")]
pub struct UnknownPrinterType(pub String);

// ============================================================================
// Storage media
// ============================================================================

/// Kind of physical medium behind a storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    /// Built-in storage.
    Local,
    /// SD card slot.
    Sdcard,
    /// USB mass storage.
    Usb,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "LOCAL",
            StorageType::Sdcard => "SDCARD",
            StorageType::Usb => "USB",
        }
    }
}

impl Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_id_roundtrip() {
        let id = CommandId::new(42);
        assert_eq!(u32::from(id), 42);
        assert_eq!(CommandId::from(42), id);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn transfer_id_default_is_zero() {
        assert_eq!(u32::from(TransferId::default()), 0);
    }

    #[test]
    fn timestamp_now_is_after_2020() {
        assert!(Timestamp::now().as_secs() > 1_577_836_800);
    }

    #[test]
    fn timestamp_saturating_add() {
        let t = Timestamp::from_secs(i64::MAX);
        assert_eq!(t.saturating_add_secs(10).as_secs(), i64::MAX);
    }

    #[test]
    fn printer_type_fingerprint_rule() {
        assert!(PrinterType::Mk3.sha256_fingerprint());
        assert!(PrinterType::Mini.sha256_fingerprint());
        assert!(!PrinterType::Mk4.sha256_fingerprint());
        assert!(!PrinterType::Core.sha256_fingerprint());
    }

    #[test]
    fn storage_type_wire_names() {
        assert_eq!(StorageType::Sdcard.as_str(), "SDCARD");
        assert_eq!(StorageType::Local.to_string(), "LOCAL");
    }
}
