//! The event model.
//!
//! Events are discrete, ordered messages queued for delivery to Connect.
//! Telemetry is deliberately *not* an event: it is a latest-value snapshot
//! that overwrites rather than queues.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CommandId, TransferId};
pub use crate::state::StateSource as EventSource;

/// What kind of message an [`Event`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Answer to `SEND_INFO` and friends.
    Info,
    /// The printer state changed.
    StateChanged,
    /// A command ran to completion.
    Finished,
    /// A command was refused.
    Rejected,
    /// A command was accepted for execution.
    Accepted,
    /// A command (or the loop) failed.
    Failed,
    /// The printer needs user attention.
    Attention,
    /// A file appeared, changed or vanished on a storage.
    FileChanged,
    /// A storage medium was inserted.
    MediumInserted,
    /// A storage medium was ejected.
    MediumEjected,
    /// Transfer progress snapshot.
    TransferInfo,
    /// A transfer was aborted.
    TransferAborted,
    /// A transfer was stopped on request.
    TransferStopped,
    /// A transfer completed.
    TransferFinished,
    /// Mesh bed leveling data.
    MeshBedLeveling,
    /// A condition flag flipped.
    ConditionChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "INFO",
            EventKind::StateChanged => "STATE_CHANGED",
            EventKind::Finished => "FINISHED",
            EventKind::Rejected => "REJECTED",
            EventKind::Accepted => "ACCEPTED",
            EventKind::Failed => "FAILED",
            EventKind::Attention => "ATTENTION",
            EventKind::FileChanged => "FILE_CHANGED",
            EventKind::MediumInserted => "MEDIUM_INSERTED",
            EventKind::MediumEjected => "MEDIUM_EJECTED",
            EventKind::TransferInfo => "TRANSFER_INFO",
            EventKind::TransferAborted => "TRANSFER_ABORTED",
            EventKind::TransferStopped => "TRANSFER_STOPPED",
            EventKind::TransferFinished => "TRANSFER_FINISHED",
            EventKind::MeshBedLeveling => "MESH_BED_LEVELING",
            EventKind::ConditionChanged => "CONDITION_CHANGED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of filesystem change reported in a `FILE_CHANGED` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
}

impl FileChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileChangeKind::Created => "CREATED",
            FileChangeKind::Modified => "MODIFIED",
            FileChangeKind::Deleted => "DELETED",
        }
    }
}

/// One outbound event.
///
/// `queued_at` is a monotonic stamp taken at enqueue time; the delivery loop
/// converts it to wall-clock seconds when the event is actually sent, so a
/// stalled queue never emits timestamps from a drifted clock.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub source: EventSource,
    /// Monotonic enqueue stamp.
    pub queued_at: Instant,
    /// Command this event belongs to, if any.
    pub command_id: Option<CommandId>,
    /// Transfer this event belongs to, if any.
    pub transfer_id: Option<TransferId>,
    /// Human-readable cause for REJECTED / FAILED / TRANSFER_ABORTED.
    pub reason: Option<String>,
    /// Free-form payload merged into the wire body.
    pub data: Map<String, Value>,
    /// Priority events jump the queue and survive overflow.
    pub priority: bool,
}

impl Event {
    /// Creates an event stamped now.
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        Self {
            kind,
            source,
            queued_at: Instant::now(),
            command_id: None,
            transfer_id: None,
            reason: None,
            data: Map::new(),
            priority: false,
        }
    }

    pub fn with_command(mut self, id: CommandId) -> Self {
        self.command_id = Some(id);
        self
    }

    pub fn with_transfer(mut self, id: TransferId) -> Self {
        self.transfer_id = Some(id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Marks the event as priority (queue-jumping, overflow-immune).
    pub fn with_priority(mut self) -> Self {
        self.priority = true;
        self
    }
}

/// Consumer of outbound events.
///
/// The filesystem and the transfer manager emit through this seam; the
/// `Printer` owns the queue behind it. A test double can capture events
/// instead.
pub trait EventSink: Send + Sync {
    /// Accepts an event for delivery. Must not block on I/O.
    fn emit(&self, event: Event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let ev = Event::new(EventKind::Rejected, EventSource::Connect)
            .with_command(CommandId::new(7))
            .with_reason("busy")
            .with_priority();
        assert_eq!(ev.kind, EventKind::Rejected);
        assert_eq!(ev.command_id, Some(CommandId::new(7)));
        assert_eq!(ev.reason.as_deref(), Some("busy"));
        assert!(ev.priority);
        assert!(ev.transfer_id.is_none());
    }

    #[test]
    fn data_accumulates() {
        let ev = Event::new(EventKind::Info, EventSource::Sdk)
            .with_data("free_space", Value::from(1024))
            .with_data("storage", Value::from("USB"));
        assert_eq!(ev.data.len(), 2);
        assert_eq!(ev.data["free_space"], Value::from(1024));
    }

    #[test]
    fn wire_names() {
        assert_eq!(EventKind::MediumEjected.as_str(), "MEDIUM_EJECTED");
        assert_eq!(FileChangeKind::Deleted.as_str(), "DELETED");
        let json = serde_json::to_string(&EventKind::TransferFinished).unwrap();
        assert_eq!(json, "\"TRANSFER_FINISHED\"");
    }
}
