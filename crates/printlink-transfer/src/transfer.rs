//! One transfer's record and shared progress state.

use std::sync::Mutex;
use std::time::Instant;

use printlink_types::{CommandId, TransferDirection, TransferId, TransferState};

use crate::throttle::Throttle;

/// What to transfer, as requested by a command or the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    /// Direction and origin.
    pub direction: TransferDirection,
    /// Remote endpoint: download source or upload destination.
    pub url: String,
    /// Virtual path on a mounted storage: download destination or upload
    /// source.
    pub path: String,
    /// Command that initiated the transfer; echoed on all its events.
    pub command_id: Option<CommandId>,
    /// Start printing once a download lands.
    pub to_print: bool,
    /// Initial throttle, bytes per second.
    pub throttle: Option<u64>,
}

/// Mutable progress of one transfer, guarded by its own lock.
#[derive(Debug)]
struct Progress {
    state: TransferState,
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    started_at: Option<Instant>,
    last_progress_at: Option<Instant>,
}

/// State shared between the owning manager, its worker, and API callers.
#[derive(Debug)]
pub(crate) struct TransferShared {
    pub(crate) id: TransferId,
    pub(crate) spec: TransferSpec,
    /// Mount name the transfer's path lives on.
    pub(crate) storage: String,
    progress: Mutex<Progress>,
    /// Cancellation request with its reason; observed between chunks.
    cancel: Mutex<Option<String>>,
    pub(crate) throttle: Mutex<Throttle>,
}

impl TransferShared {
    pub(crate) fn new(id: TransferId, spec: TransferSpec, storage: String) -> Self {
        let throttle = Throttle::new(spec.throttle);
        Self {
            id,
            spec,
            storage,
            progress: Mutex::new(Progress {
                state: TransferState::Enqueued,
                bytes_transferred: 0,
                total_bytes: None,
                started_at: None,
                last_progress_at: None,
            }),
            cancel: Mutex::new(None),
            throttle: Mutex::new(throttle),
        }
    }

    pub(crate) fn set_state(&self, state: TransferState) {
        let mut p = self.progress.lock().expect("transfer lock poisoned");
        p.state = state;
        if state == TransferState::Running && p.started_at.is_none() {
            let now = Instant::now();
            p.started_at = Some(now);
            p.last_progress_at = Some(now);
        }
    }

    pub(crate) fn state(&self) -> TransferState {
        self.progress.lock().expect("transfer lock poisoned").state
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.progress.lock().expect("transfer lock poisoned").total_bytes = total;
    }

    /// Accounts `n` freshly moved bytes.
    ///
    /// `bytes_transferred` is monotone and never exceeds a known total.
    pub(crate) fn record_progress(&self, n: u64) {
        let mut p = self.progress.lock().expect("transfer lock poisoned");
        let mut next = p.bytes_transferred.saturating_add(n);
        if let Some(total) = p.total_bytes {
            next = next.min(total);
        }
        p.bytes_transferred = next;
        p.last_progress_at = Some(Instant::now());
    }

    /// Seconds since the last byte moved.
    pub(crate) fn idle_for(&self) -> Option<std::time::Duration> {
        let p = self.progress.lock().expect("transfer lock poisoned");
        p.last_progress_at.map(|t| t.elapsed())
    }

    /// Requests cancellation; the first reason wins.
    pub(crate) fn request_cancel(&self, reason: &str) {
        let mut cancel = self.cancel.lock().expect("transfer lock poisoned");
        if cancel.is_none() {
            *cancel = Some(reason.to_string());
        }
    }

    pub(crate) fn cancel_requested(&self) -> Option<String> {
        self.cancel.lock().expect("transfer lock poisoned").clone()
    }

    pub(crate) fn snapshot(&self) -> TransferSnapshot {
        let p = self.progress.lock().expect("transfer lock poisoned");
        let throttle = self.throttle.lock().expect("transfer lock poisoned").rate();
        let elapsed = p.started_at.map(|t| t.elapsed().as_secs_f64());
        let rate = match (elapsed, p.bytes_transferred) {
            (Some(secs), bytes) if secs > 0.0 => Some(bytes as f64 / secs),
            _ => None,
        };
        let progress_percent = p.total_bytes.filter(|t| *t > 0).map(|total| {
            (p.bytes_transferred as f64 / total as f64 * 100.0).min(100.0)
        });
        let time_remaining = match (rate, p.total_bytes) {
            (Some(rate), Some(total)) if rate > 0.0 => {
                Some(((total.saturating_sub(p.bytes_transferred)) as f64 / rate) as u64)
            }
            _ => None,
        };
        TransferSnapshot {
            id: self.id,
            direction: self.spec.direction,
            url: self.spec.url.clone(),
            path: self.spec.path.clone(),
            command_id: self.spec.command_id,
            to_print: self.spec.to_print,
            state: p.state,
            bytes_transferred: p.bytes_transferred,
            total_bytes: p.total_bytes,
            progress_percent,
            time_remaining,
            throttle,
        }
    }
}

/// Point-in-time view of one transfer, safe to hand out.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub direction: TransferDirection,
    pub url: String,
    pub path: String,
    pub command_id: Option<CommandId>,
    pub to_print: bool,
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    /// Percent complete, when the total is known.
    pub progress_percent: Option<f64>,
    /// Estimated seconds remaining, when the total and rate are known.
    pub time_remaining: Option<u64>,
    /// Current throttle, bytes per second.
    pub throttle: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TransferSpec {
        TransferSpec {
            direction: TransferDirection::DownloadFromUrl,
            url: "https://example.com/a.gcode".into(),
            path: "/usb/a.gcode".into(),
            command_id: Some(CommandId::new(5)),
            to_print: false,
            throttle: None,
        }
    }

    #[test]
    fn progress_is_monotone_and_clamped() {
        let t = TransferShared::new(TransferId::new(1), spec(), "usb".into());
        t.set_total(Some(100));
        t.record_progress(60);
        t.record_progress(60);
        let snap = t.snapshot();
        assert_eq!(snap.bytes_transferred, 100, "clamped to total");
        assert_eq!(snap.progress_percent, Some(100.0));
    }

    #[test]
    fn first_cancel_reason_wins() {
        let t = TransferShared::new(TransferId::new(1), spec(), "usb".into());
        t.request_cancel("deleted");
        t.request_cancel("shutdown");
        assert_eq!(t.cancel_requested().as_deref(), Some("deleted"));
    }

    #[test]
    fn running_stamps_start_once() {
        let t = TransferShared::new(TransferId::new(1), spec(), "usb".into());
        t.set_state(TransferState::Running);
        let snap1 = t.snapshot();
        t.set_state(TransferState::Finishing);
        t.set_state(TransferState::Running);
        let snap2 = t.snapshot();
        assert_eq!(snap1.state, TransferState::Running);
        assert_eq!(snap2.state, TransferState::Running);
    }

    #[test]
    fn snapshot_estimates_remaining_time() {
        let t = TransferShared::new(TransferId::new(2), spec(), "usb".into());
        t.set_state(TransferState::Running);
        t.set_total(Some(1_000_000));
        std::thread::sleep(std::time::Duration::from_millis(20));
        t.record_progress(500_000);
        let snap = t.snapshot();
        assert!(snap.progress_percent.unwrap() > 49.0);
        assert!(snap.time_remaining.is_some());
    }
}
