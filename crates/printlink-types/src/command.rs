//! Commands and their typed payloads.
//!
//! Connect embeds a command in a telemetry response: a `Command-Id` header
//! plus a JSON body of the shape `{"command": "START_PRINT", "args": [...],
//! "kwargs": {...}, "force": false}`. The open-ended args/kwargs surface is
//! discriminated here into one typed record per kind, so dispatch downstream
//! is a plain `match` with no stringly-typed lookups.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::CommandId;

/// Lifecycle state of a command instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandState {
    /// Parsed, not yet acknowledged.
    New,
    /// Acknowledged to the service; waiting for the handler thread.
    Accepted,
    /// Handler is executing.
    Running,
    /// Terminal: handler completed.
    Finished,
    /// Terminal: refused (busy, unknown kind, malformed args, preempted).
    Rejected,
    /// Terminal: handler raised an error.
    Failed,
}

impl CommandState {
    /// True for states no further transition may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Finished | CommandState::Rejected | CommandState::Failed
        )
    }
}

/// Malformed or unknown command body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    /// The command name is not in the closed kind set.
    #[error("unknown command: {0}")]
    UnknownKind(String),
    /// A required argument is absent.
    #[error("{kind}: missing argument {name}")]
    MissingArg {
        /// Wire name of the command.
        kind: &'static str,
        /// Name of the absent argument.
        name: &'static str,
    },
    /// An argument is present but has the wrong shape.
    #[error("{kind}: argument {name} has invalid type")]
    InvalidArg {
        /// Wire name of the command.
        kind: &'static str,
        /// Name of the offending argument.
        name: &'static str,
    },
}

/// Bare command kind, used for handler registration and priority sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    SendInfo,
    Gcode,
    StartPrint,
    StopPrint,
    PausePrint,
    ResumePrint,
    SetPrinterReady,
    CancelPrinterReady,
    ResetPrinter,
    SendFileInfo,
    CreateFolder,
    DeleteFolder,
    DeleteFile,
    StartUrlDownload,
    StartConnectDownload,
    StopTransfer,
    SendTransferInfo,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SendInfo => "SEND_INFO",
            CommandKind::Gcode => "GCODE",
            CommandKind::StartPrint => "START_PRINT",
            CommandKind::StopPrint => "STOP_PRINT",
            CommandKind::PausePrint => "PAUSE_PRINT",
            CommandKind::ResumePrint => "RESUME_PRINT",
            CommandKind::SetPrinterReady => "SET_PRINTER_READY",
            CommandKind::CancelPrinterReady => "CANCEL_PRINTER_READY",
            CommandKind::ResetPrinter => "RESET_PRINTER",
            CommandKind::SendFileInfo => "SEND_FILE_INFO",
            CommandKind::CreateFolder => "CREATE_FOLDER",
            CommandKind::DeleteFolder => "DELETE_FOLDER",
            CommandKind::DeleteFile => "DELETE_FILE",
            CommandKind::StartUrlDownload => "START_URL_DOWNLOAD",
            CommandKind::StartConnectDownload => "START_CONNECT_DOWNLOAD",
            CommandKind::StopTransfer => "STOP_TRANSFER",
            CommandKind::SendTransferInfo => "SEND_TRANSFER_INFO",
        }
    }
}

impl std::str::FromStr for CommandKind {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SEND_INFO" => Ok(CommandKind::SendInfo),
            "GCODE" => Ok(CommandKind::Gcode),
            "START_PRINT" => Ok(CommandKind::StartPrint),
            "STOP_PRINT" => Ok(CommandKind::StopPrint),
            "PAUSE_PRINT" => Ok(CommandKind::PausePrint),
            "RESUME_PRINT" => Ok(CommandKind::ResumePrint),
            "SET_PRINTER_READY" => Ok(CommandKind::SetPrinterReady),
            "CANCEL_PRINTER_READY" => Ok(CommandKind::CancelPrinterReady),
            "RESET_PRINTER" => Ok(CommandKind::ResetPrinter),
            "SEND_FILE_INFO" => Ok(CommandKind::SendFileInfo),
            "CREATE_FOLDER" => Ok(CommandKind::CreateFolder),
            "DELETE_FOLDER" => Ok(CommandKind::DeleteFolder),
            "DELETE_FILE" => Ok(CommandKind::DeleteFile),
            "START_URL_DOWNLOAD" => Ok(CommandKind::StartUrlDownload),
            "START_CONNECT_DOWNLOAD" => Ok(CommandKind::StartConnectDownload),
            "STOP_TRANSFER" => Ok(CommandKind::StopTransfer),
            "SEND_TRANSFER_INFO" => Ok(CommandKind::SendTransferInfo),
            other => Err(CommandParseError::UnknownKind(other.to_string())),
        }
    }
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command kind with its typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    /// Report printer identity, network info and storage roots.
    SendInfo,
    /// Execute a raw g-code fragment.
    Gcode {
        /// The g-code text to execute.
        code: String,
    },
    /// Start printing the given file.
    StartPrint {
        /// Absolute virtual path of the g-code file.
        path: String,
    },
    /// Stop the running job.
    StopPrint,
    /// Pause the running job.
    PausePrint,
    /// Resume a paused job.
    ResumePrint,
    /// Mark the printer ready to accept a job.
    SetPrinterReady,
    /// Withdraw readiness.
    CancelPrinterReady,
    /// Reset the printer. Priority by default: preempts a running command.
    ResetPrinter,
    /// Report metadata of one file.
    SendFileInfo {
        /// Absolute virtual path.
        path: String,
    },
    /// Create a folder (and missing ancestors are not implied).
    CreateFolder {
        /// Absolute virtual path of the new folder.
        path: String,
    },
    /// Delete a folder.
    DeleteFolder {
        /// Absolute virtual path.
        path: String,
    },
    /// Delete a file.
    DeleteFile {
        /// Absolute virtual path.
        path: String,
    },
    /// Download a file from an arbitrary URL into a storage path.
    StartUrlDownload {
        /// Source URL.
        url: String,
        /// Absolute virtual destination path.
        destination: String,
        /// Start printing once the download lands.
        to_print: bool,
    },
    /// Download a file from Connect's own file store.
    StartConnectDownload {
        /// Server-relative path of the stored file.
        source: String,
        /// Absolute virtual destination path.
        destination: String,
        /// Start printing once the download lands.
        to_print: bool,
    },
    /// Stop the current (or a specific) transfer.
    StopTransfer {
        /// Specific transfer to stop; `None` means the active one.
        transfer_id: Option<u32>,
    },
    /// Report progress of the active transfer.
    SendTransferInfo,
}

impl CommandPayload {
    /// Bare kind of this payload.
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::SendInfo => CommandKind::SendInfo,
            CommandPayload::Gcode { .. } => CommandKind::Gcode,
            CommandPayload::StartPrint { .. } => CommandKind::StartPrint,
            CommandPayload::StopPrint => CommandKind::StopPrint,
            CommandPayload::PausePrint => CommandKind::PausePrint,
            CommandPayload::ResumePrint => CommandKind::ResumePrint,
            CommandPayload::SetPrinterReady => CommandKind::SetPrinterReady,
            CommandPayload::CancelPrinterReady => CommandKind::CancelPrinterReady,
            CommandPayload::ResetPrinter => CommandKind::ResetPrinter,
            CommandPayload::SendFileInfo { .. } => CommandKind::SendFileInfo,
            CommandPayload::CreateFolder { .. } => CommandKind::CreateFolder,
            CommandPayload::DeleteFolder { .. } => CommandKind::DeleteFolder,
            CommandPayload::DeleteFile { .. } => CommandKind::DeleteFile,
            CommandPayload::StartUrlDownload { .. } => CommandKind::StartUrlDownload,
            CommandPayload::StartConnectDownload { .. } => CommandKind::StartConnectDownload,
            CommandPayload::StopTransfer { .. } => CommandKind::StopTransfer,
            CommandPayload::SendTransferInfo => CommandKind::SendTransferInfo,
        }
    }

    /// Wire name of this command kind.
    pub fn kind_str(&self) -> &'static str {
        match self {
            CommandPayload::SendInfo => "SEND_INFO",
            CommandPayload::Gcode { .. } => "GCODE",
            CommandPayload::StartPrint { .. } => "START_PRINT",
            CommandPayload::StopPrint => "STOP_PRINT",
            CommandPayload::PausePrint => "PAUSE_PRINT",
            CommandPayload::ResumePrint => "RESUME_PRINT",
            CommandPayload::SetPrinterReady => "SET_PRINTER_READY",
            CommandPayload::CancelPrinterReady => "CANCEL_PRINTER_READY",
            CommandPayload::ResetPrinter => "RESET_PRINTER",
            CommandPayload::SendFileInfo { .. } => "SEND_FILE_INFO",
            CommandPayload::CreateFolder { .. } => "CREATE_FOLDER",
            CommandPayload::DeleteFolder { .. } => "DELETE_FOLDER",
            CommandPayload::DeleteFile { .. } => "DELETE_FILE",
            CommandPayload::StartUrlDownload { .. } => "START_URL_DOWNLOAD",
            CommandPayload::StartConnectDownload { .. } => "START_CONNECT_DOWNLOAD",
            CommandPayload::StopTransfer { .. } => "STOP_TRANSFER",
            CommandPayload::SendTransferInfo => "SEND_TRANSFER_INFO",
        }
    }

    /// Discriminates a wire body into a typed payload.
    ///
    /// `args` are positional, `kwargs` keyed; for historical reasons most
    /// kinds accept their first argument either way.
    pub fn parse(
        kind: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Self, CommandParseError> {
        let str_arg = |pos: usize, name: &'static str, kind: &'static str| {
            args.get(pos)
                .or_else(|| kwargs.get(name))
                .ok_or(CommandParseError::MissingArg { kind, name })
                .and_then(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or(CommandParseError::InvalidArg { kind, name })
                })
        };
        let bool_kwarg = |name: &str| kwargs.get(name).and_then(Value::as_bool).unwrap_or(false);

        match kind {
            "SEND_INFO" => Ok(CommandPayload::SendInfo),
            "GCODE" => Ok(CommandPayload::Gcode {
                code: str_arg(0, "code", "GCODE")?,
            }),
            "START_PRINT" => Ok(CommandPayload::StartPrint {
                path: str_arg(0, "path", "START_PRINT")?,
            }),
            "STOP_PRINT" => Ok(CommandPayload::StopPrint),
            "PAUSE_PRINT" => Ok(CommandPayload::PausePrint),
            "RESUME_PRINT" => Ok(CommandPayload::ResumePrint),
            "SET_PRINTER_READY" => Ok(CommandPayload::SetPrinterReady),
            "CANCEL_PRINTER_READY" => Ok(CommandPayload::CancelPrinterReady),
            "RESET_PRINTER" => Ok(CommandPayload::ResetPrinter),
            "SEND_FILE_INFO" => Ok(CommandPayload::SendFileInfo {
                path: str_arg(0, "path", "SEND_FILE_INFO")?,
            }),
            "CREATE_FOLDER" => Ok(CommandPayload::CreateFolder {
                path: str_arg(0, "path", "CREATE_FOLDER")?,
            }),
            "DELETE_FOLDER" => Ok(CommandPayload::DeleteFolder {
                path: str_arg(0, "path", "DELETE_FOLDER")?,
            }),
            "DELETE_FILE" => Ok(CommandPayload::DeleteFile {
                path: str_arg(0, "path", "DELETE_FILE")?,
            }),
            "START_URL_DOWNLOAD" => Ok(CommandPayload::StartUrlDownload {
                url: str_arg(0, "url", "START_URL_DOWNLOAD")?,
                destination: str_arg(1, "destination", "START_URL_DOWNLOAD")?,
                to_print: bool_kwarg("to_print"),
            }),
            "START_CONNECT_DOWNLOAD" => Ok(CommandPayload::StartConnectDownload {
                source: str_arg(0, "source", "START_CONNECT_DOWNLOAD")?,
                destination: str_arg(1, "destination", "START_CONNECT_DOWNLOAD")?,
                to_print: bool_kwarg("to_print"),
            }),
            "STOP_TRANSFER" => Ok(CommandPayload::StopTransfer {
                transfer_id: args
                    .first()
                    .or_else(|| kwargs.get("transfer_id"))
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
            }),
            "SEND_TRANSFER_INFO" => Ok(CommandPayload::SendTransferInfo),
            other => Err(CommandParseError::UnknownKind(other.to_string())),
        }
    }
}

impl Display for CommandPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}

/// One parsed command as received from Connect.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Service-issued identifier.
    pub id: CommandId,
    /// Typed payload.
    pub payload: CommandPayload,
    /// Caller insists on a destructive variant of the operation.
    pub force: bool,
}

impl Command {
    pub fn new(id: CommandId, payload: CommandPayload) -> Self {
        Self {
            id,
            payload,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}
