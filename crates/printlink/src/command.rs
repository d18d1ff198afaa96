//! Command dispatch and lifecycle.
//!
//! A command arrives on the loop thread inside a telemetry response, is
//! acknowledged immediately (`ACCEPTED`), and waits in a single slot for
//! the handler thread to pick it up via [`Printer::command`]. One command
//! runs at a time; a non-priority arrival while the slot is occupied is
//! rejected `busy`, a priority arrival (typically `RESET_PRINTER`) preempts
//! whatever holds the slot.
//!
//! [`Printer::command`]: crate::Printer::command

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use printlink_types::{Command, CommandId, CommandKind, CommandState, EventKind, EventSource};

use crate::error::SdkResult;
use crate::printer::Printer;

/// What a handler reports back on success.
///
/// The omitted `event` defaults to `FINISHED`; `SEND_INFO`-style commands
/// answer with `INFO` instead.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// Where the effect took place.
    pub source: EventSource,
    /// Terminal event kind; `None` means `FINISHED`.
    pub event: Option<EventKind>,
    /// Payload merged into the terminal event.
    pub data: Map<String, Value>,
}

impl HandlerOutcome {
    /// The plain success outcome.
    pub fn finished(source: EventSource) -> Self {
        Self {
            source,
            event: None,
            data: Map::new(),
        }
    }

    /// Success reported through a specific event kind.
    pub fn with_event(source: EventSource, event: EventKind) -> Self {
        Self {
            source,
            event: Some(event),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// A registered command handler.
///
/// Runs on the handler thread, never on the loop. The `Printer` reference
/// gives handlers access to the filesystem, transfers and state.
pub type CommandHandler = Arc<dyn Fn(&Printer, &Command) -> SdkResult<HandlerOutcome> + Send + Sync>;

/// One in-flight command and its state machine.
///
/// `NEW → ACCEPTED → RUNNING → (FINISHED | FAILED | REJECTED)`
#[derive(Debug, Clone)]
pub struct CommandInstance {
    /// The parsed command.
    pub command: Command,
    state: CommandState,
    /// Terminal event was already emitted by a preemptor.
    preempted: bool,
}

impl CommandInstance {
    fn new(command: Command) -> Self {
        Self {
            command,
            state: CommandState::New,
            preempted: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn id(&self) -> CommandId {
        self.command.id
    }
}

/// Result of offering a freshly parsed command to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Stored; the handler thread will run it.
    Accepted,
    /// Another command occupies the slot and the newcomer is not priority.
    RejectedBusy,
    /// The newcomer preempted the listed commands (their `REJECTED`
    /// events are the caller's to emit).
    Preempted {
        /// Commands knocked out by the arrival, oldest first.
        rejected: Vec<CommandId>,
    },
    /// The service re-delivered a command already in the slot.
    Duplicate,
}

struct DispatchState {
    /// Command currently executing on the handler thread.
    running: Option<CommandInstance>,
    /// Command accepted and waiting for the handler thread.
    pending: Option<CommandInstance>,
}

/// Kind → handler mapping plus the single-command execution slot.
pub struct CommandDispatcher {
    handlers: RwLock<HashMap<CommandKind, CommandHandler>>,
    priority: HashSet<CommandKind>,
    state: Mutex<DispatchState>,
}

impl CommandDispatcher {
    /// Creates a dispatcher; `priority` kinds preempt the slot.
    pub fn new(priority: HashSet<CommandKind>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            priority,
            state: Mutex::new(DispatchState {
                running: None,
                pending: None,
            }),
        }
    }

    /// Registers (or replaces) the handler for a kind.
    pub fn register(&self, kind: CommandKind, handler: CommandHandler) {
        self.handlers
            .write()
            .expect("handler registry poisoned")
            .insert(kind, handler);
    }

    /// Returns the handler for a kind, if registered.
    pub fn handler_for(&self, kind: CommandKind) -> Option<CommandHandler> {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .get(&kind)
            .cloned()
    }

    /// True when the kind preempts a running command.
    pub fn is_priority(&self, kind: CommandKind) -> bool {
        self.priority.contains(&kind)
    }

    /// Offers a parsed command for execution (loop thread).
    pub fn offer(&self, command: Command) -> Offer {
        let kind = command.payload.kind();
        let mut state = self.state.lock().expect("dispatch state poisoned");

        let occupied_by = |i: &CommandInstance| i.id() == command.id;
        if state.running.as_ref().is_some_and(occupied_by)
            || state.pending.as_ref().is_some_and(occupied_by)
        {
            return Offer::Duplicate;
        }

        let occupied = state.running.is_some() || state.pending.is_some();
        if !occupied {
            let mut instance = CommandInstance::new(command);
            instance.state = CommandState::Accepted;
            state.pending = Some(instance);
            return Offer::Accepted;
        }

        if !self.is_priority(kind) {
            return Offer::RejectedBusy;
        }

        let mut rejected = Vec::new();
        if let Some(running) = state.running.as_mut() {
            if !running.preempted {
                running.preempted = true;
                rejected.push(running.id());
            }
        }
        if let Some(old) = state.pending.take() {
            rejected.push(old.id());
        }
        let mut instance = CommandInstance::new(command);
        instance.state = CommandState::Accepted;
        state.pending = Some(instance);
        debug!(?rejected, "priority command preempted the slot");
        Offer::Preempted { rejected }
    }

    /// Moves the pending command into the running slot (handler thread).
    ///
    /// `None` while another command still runs or nothing is pending.
    pub fn take_pending(&self) -> Option<Command> {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        if state.running.is_some() {
            return None;
        }
        let mut instance = state.pending.take()?;
        instance.state = CommandState::Running;
        let command = instance.command.clone();
        state.running = Some(instance);
        Some(command)
    }

    /// Retires the running command; returns true when its terminal event
    /// was already emitted by a preemptor and must not be emitted again.
    pub fn finish(&self, id: CommandId, terminal: CommandState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut state = self.state.lock().expect("dispatch state poisoned");
        match state.running.take() {
            Some(mut instance) if instance.id() == id => {
                instance.state = terminal;
                instance.preempted
            }
            other => {
                // Not ours; put it back.
                state.running = other;
                false
            }
        }
    }

    /// Id the telemetry body should carry while a command is in progress.
    pub fn command_id_in_progress(&self) -> Option<CommandId> {
        let state = self.state.lock().expect("dispatch state poisoned");
        state
            .running
            .as_ref()
            .map(CommandInstance::id)
            .or_else(|| state.pending.as_ref().map(CommandInstance::id))
    }

    /// State of the command occupying the slot, if any.
    pub fn current(&self) -> Option<(CommandId, CommandState)> {
        let state = self.state.lock().expect("dispatch state poisoned");
        state
            .running
            .as_ref()
            .or(state.pending.as_ref())
            .map(|i| (i.id(), i.state()))
    }
}

#[cfg(test)]
mod tests {
    use printlink_types::CommandPayload;

    use super::*;

    fn command(id: u32, payload: CommandPayload) -> Command {
        Command::new(CommandId::new(id), payload)
    }

    fn dispatcher() -> CommandDispatcher {
        CommandDispatcher::new(HashSet::from([CommandKind::ResetPrinter]))
    }

    #[test]
    fn empty_slot_accepts() {
        let d = dispatcher();
        assert_eq!(d.offer(command(1, CommandPayload::SendInfo)), Offer::Accepted);
        assert_eq!(d.command_id_in_progress(), Some(CommandId::new(1)));
        assert_eq!(d.current().unwrap().1, CommandState::Accepted);
    }

    #[test]
    fn occupied_slot_rejects_busy() {
        let d = dispatcher();
        d.offer(command(1, CommandPayload::StopPrint));
        assert_eq!(
            d.offer(command(2, CommandPayload::SendInfo)),
            Offer::RejectedBusy
        );
    }

    #[test]
    fn redelivery_is_a_duplicate() {
        let d = dispatcher();
        d.offer(command(1, CommandPayload::SendInfo));
        assert_eq!(d.offer(command(1, CommandPayload::SendInfo)), Offer::Duplicate);
    }

    #[test]
    fn priority_preempts_running() {
        let d = dispatcher();
        d.offer(command(1, CommandPayload::StopPrint));
        let taken = d.take_pending().unwrap();
        assert_eq!(taken.id, CommandId::new(1));
        assert_eq!(d.current().unwrap().1, CommandState::Running);

        let offer = d.offer(command(2, CommandPayload::ResetPrinter));
        assert_eq!(
            offer,
            Offer::Preempted {
                rejected: vec![CommandId::new(1)]
            }
        );

        // The preempted command's own finish is suppressed.
        assert!(d.finish(CommandId::new(1), CommandState::Rejected));

        // The priority command now runs normally.
        let taken = d.take_pending().unwrap();
        assert_eq!(taken.id, CommandId::new(2));
        assert!(!d.finish(CommandId::new(2), CommandState::Finished));
        assert!(d.command_id_in_progress().is_none());
    }

    #[test]
    fn priority_replaces_pending_too() {
        let d = dispatcher();
        d.offer(command(1, CommandPayload::StopPrint));
        let offer = d.offer(command(2, CommandPayload::ResetPrinter));
        assert_eq!(
            offer,
            Offer::Preempted {
                rejected: vec![CommandId::new(1)]
            }
        );
        assert_eq!(d.take_pending().unwrap().id, CommandId::new(2));
    }

    #[test]
    fn take_pending_waits_for_running_to_clear() {
        let d = dispatcher();
        d.offer(command(1, CommandPayload::SendInfo));
        assert!(d.take_pending().is_some());
        d.offer(command(2, CommandPayload::ResetPrinter));
        assert!(d.take_pending().is_none(), "one running at a time");
        d.finish(CommandId::new(1), CommandState::Finished);
        assert!(d.take_pending().is_some());
    }

    #[test]
    fn handler_registration_replaces() {
        let d = dispatcher();
        assert!(d.handler_for(CommandKind::Gcode).is_none());
        d.register(
            CommandKind::Gcode,
            Arc::new(|_, _| Ok(HandlerOutcome::finished(EventSource::Marlin))),
        );
        assert!(d.handler_for(CommandKind::Gcode).is_some());
        // Replacing is allowed at any time.
        d.register(
            CommandKind::Gcode,
            Arc::new(|_, _| Ok(HandlerOutcome::finished(EventSource::Firmware))),
        );
        assert!(d.handler_for(CommandKind::Gcode).is_some());
    }

    #[test]
    fn outcome_builders() {
        let outcome = HandlerOutcome::with_event(EventSource::Sdk, EventKind::Info)
            .with_data("serial", Value::from("SN1"));
        assert_eq!(outcome.event, Some(EventKind::Info));
        assert_eq!(outcome.data["serial"], Value::from("SN1"));
    }
}
