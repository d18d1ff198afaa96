//! Transfer lifecycle types.

use serde::{Deserialize, Serialize};

/// Direction and origin of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferDirection {
    /// Download from Connect's own file store.
    DownloadFromConnect,
    /// Download from an arbitrary URL.
    DownloadFromUrl,
    /// Upload to Connect's file store.
    UploadToConnect,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::DownloadFromConnect => "DOWNLOAD_FROM_CONNECT",
            TransferDirection::DownloadFromUrl => "DOWNLOAD_FROM_URL",
            TransferDirection::UploadToConnect => "UPLOAD_TO_CONNECT",
        }
    }

    /// True for the two download directions.
    pub fn is_download(&self) -> bool {
        !matches!(self, TransferDirection::UploadToConnect)
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Waiting for its storage to become free.
    Enqueued,
    /// A worker is moving bytes.
    Running,
    /// All bytes moved; fsync and rename in progress.
    Finishing,
    /// Terminal: completed.
    Finished,
    /// Terminal: cancelled (shutdown, stop command, target deleted).
    Aborted,
    /// Terminal: errored (timeout, I/O, HTTP).
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Finished | TransferState::Aborted | TransferState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Enqueued => "ENQUEUED",
            TransferState::Running => "RUNNING",
            TransferState::Finishing => "FINISHING",
            TransferState::Finished => "FINISHED",
            TransferState::Aborted => "ABORTED",
            TransferState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TransferState::Finished.is_terminal());
        assert!(TransferState::Aborted.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Enqueued.is_terminal());
        assert!(!TransferState::Running.is_terminal());
        assert!(!TransferState::Finishing.is_terminal());
    }

    #[test]
    fn direction_predicates() {
        assert!(TransferDirection::DownloadFromUrl.is_download());
        assert!(TransferDirection::DownloadFromConnect.is_download());
        assert!(!TransferDirection::UploadToConnect.is_download());
    }
}
