//! Printer state machine.
//!
//! States are published to Connect in telemetry and `STATE_CHANGED` events.
//! The transition graph is deliberately permissive about recovery paths
//! (anything may enter `Error` or `Attention`) and strict about the print
//! lifecycle: a print leaves `Printing` only through `Paused`, `Finished`
//! or `Stopped`, never straight back to `Ready`.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a state change or event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateSource {
    /// The Connect service itself (e.g. a command side effect).
    Connect,
    /// The motion firmware.
    Marlin,
    /// The printer's local web UI.
    Wui,
    /// Non-motion firmware subsystems.
    Firmware,
    /// The SDK core.
    Sdk,
}

impl StateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSource::Connect => "CONNECT",
            StateSource::Marlin => "MARLIN",
            StateSource::Wui => "WUI",
            StateSource::Firmware => "FIRMWARE",
            StateSource::Sdk => "SDK",
        }
    }
}

impl Display for StateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted state transition is not in the allowed graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("forbidden state transition {from} -> {to}")]
pub struct TransitionError {
    /// State the printer was in.
    pub from: PrinterState,
    /// State that was requested.
    pub to: PrinterState,
}

/// Operational state of the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterState {
    /// Powered on, not ready to accept a job.
    Idle,
    /// Ready to accept a job.
    Ready,
    /// Occupied by something other than printing (calibration, flashing).
    Busy,
    /// A job is running.
    Printing,
    /// A job is paused.
    Paused,
    /// A job ran to completion; awaiting user acknowledgement.
    Finished,
    /// A job was stopped before completion.
    Stopped,
    /// A hard error; user intervention required.
    Error,
    /// A recoverable problem; user attention required.
    Attention,
}

impl PrinterState {
    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterState::Idle => "IDLE",
            PrinterState::Ready => "READY",
            PrinterState::Busy => "BUSY",
            PrinterState::Printing => "PRINTING",
            PrinterState::Paused => "PAUSED",
            PrinterState::Finished => "FINISHED",
            PrinterState::Stopped => "STOPPED",
            PrinterState::Error => "ERROR",
            PrinterState::Attention => "ATTENTION",
        }
    }

    /// True when a job occupies the printer (print-control commands apply).
    pub fn is_job_active(&self) -> bool {
        matches!(self, PrinterState::Printing | PrinterState::Paused)
    }

    /// Whether the transition `self -> new` is in the allowed graph.
    ///
    /// Rules:
    /// - Self-loops are not transitions (callers treat them as no-ops).
    /// - Any state may enter `Error` or `Attention`.
    /// - `Error` and `Attention` recover to `Idle` or `Ready`.
    /// - `Idle` and `Ready` are interchangeable; which one the firmware
    ///   rests in is the embedder's choice.
    /// - `Printing` leaves only to `Paused`, `Finished` or `Stopped`;
    ///   `Ready` is reachable again only through those.
    pub fn can_transition_to(self, new: PrinterState) -> bool {
        use PrinterState::{
            Attention, Busy, Error, Finished, Idle, Paused, Printing, Ready, Stopped,
        };

        if self == new {
            return false;
        }
        if matches!(new, Error | Attention) {
            return true;
        }

        match self {
            Idle | Ready => matches!(new, Idle | Ready | Busy | Printing),
            Busy => matches!(new, Idle | Ready | Printing),
            Printing => matches!(new, Paused | Finished | Stopped),
            Paused => matches!(new, Printing | Finished | Stopped),
            Finished | Stopped => matches!(new, Idle | Ready | Busy | Printing),
            Error | Attention => matches!(new, Idle | Ready),
        }
    }
}

impl Display for PrinterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrinterState {
    type Err = UnknownState;

    /// Parses a wire state name. `PREPARED` is a historical alias of `READY`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(PrinterState::Idle),
            "READY" | "PREPARED" => Ok(PrinterState::Ready),
            "BUSY" => Ok(PrinterState::Busy),
            "PRINTING" => Ok(PrinterState::Printing),
            "PAUSED" => Ok(PrinterState::Paused),
            "FINISHED" => Ok(PrinterState::Finished),
            "STOPPED" => Ok(PrinterState::Stopped),
            "ERROR" => Ok(PrinterState::Error),
            "ATTENTION" => Ok(PrinterState::Attention),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// State name not recognised on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown printer state: {0}")]
pub struct UnknownState(pub String);

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(PrinterState::Idle, PrinterState::Ready, true; "idle to ready")]
    #[test_case(PrinterState::Ready, PrinterState::Idle, true; "ready to idle")]
    #[test_case(PrinterState::Ready, PrinterState::Printing, true; "ready to printing")]
    #[test_case(PrinterState::Printing, PrinterState::Ready, false; "printing straight to ready")]
    #[test_case(PrinterState::Printing, PrinterState::Idle, false; "printing straight to idle")]
    #[test_case(PrinterState::Printing, PrinterState::Finished, true; "printing to finished")]
    #[test_case(PrinterState::Printing, PrinterState::Stopped, true; "printing to stopped")]
    #[test_case(PrinterState::Finished, PrinterState::Ready, true; "finished to ready")]
    #[test_case(PrinterState::Stopped, PrinterState::Ready, true; "stopped to ready")]
    #[test_case(PrinterState::Paused, PrinterState::Printing, true; "resume")]
    #[test_case(PrinterState::Busy, PrinterState::Paused, false; "busy to paused")]
    #[test_case(PrinterState::Error, PrinterState::Printing, false; "error to printing")]
    #[test_case(PrinterState::Error, PrinterState::Ready, true; "error recovery")]
    fn transition_graph(from: PrinterState, to: PrinterState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn any_state_may_enter_error_and_attention() {
        for from in [
            PrinterState::Idle,
            PrinterState::Ready,
            PrinterState::Busy,
            PrinterState::Printing,
            PrinterState::Paused,
            PrinterState::Finished,
            PrinterState::Stopped,
        ] {
            assert!(from.can_transition_to(PrinterState::Error), "{from} -> ERROR");
            assert!(
                from.can_transition_to(PrinterState::Attention),
                "{from} -> ATTENTION"
            );
        }
    }

    #[test]
    fn self_loop_is_not_a_transition() {
        assert!(!PrinterState::Printing.can_transition_to(PrinterState::Printing));
    }

    #[test]
    fn prepared_parses_as_ready() {
        assert_eq!("PREPARED".parse::<PrinterState>(), Ok(PrinterState::Ready));
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("WARMING_UP".parse::<PrinterState>().is_err());
    }

    #[test]
    fn serde_wire_names_are_screaming_snake() {
        let json = serde_json::to_string(&PrinterState::Attention).unwrap();
        assert_eq!(json, "\"ATTENTION\"");
    }
}
