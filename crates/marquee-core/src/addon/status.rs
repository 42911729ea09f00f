//! Status protocol between add-ons and the host.
//!
//! Add-on entry points return a small closed status set. Anything other
//! than `Ok` either aborts the operation or asks the host for a follow-up:
//! a settings transfer, a restart prompt, or disabling the add-on.

use std::fmt;

use marquee_addon::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Host-side view of the status codes add-ons return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddonStatus {
    Ok,
    NeedRestart,
    NeedSettings,
    PermanentFailure,
    NotImplemented,
    Unknown,
}

impl AddonStatus {
    /// Total mapping from wire codes; codes the host does not know collapse
    /// to [`AddonStatus::Unknown`].
    pub fn from_code(code: StatusCode) -> Self {
        match code {
            StatusCode::OK => AddonStatus::Ok,
            StatusCode::NEED_RESTART => AddonStatus::NeedRestart,
            StatusCode::NEED_SETTINGS => AddonStatus::NeedSettings,
            StatusCode::PERMANENT_FAILURE => AddonStatus::PermanentFailure,
            StatusCode::NOT_IMPLEMENTED => AddonStatus::NotImplemented,
            _ => AddonStatus::Unknown,
        }
    }

    pub fn code(self) -> StatusCode {
        match self {
            AddonStatus::Ok => StatusCode::OK,
            AddonStatus::NeedRestart => StatusCode::NEED_RESTART,
            AddonStatus::NeedSettings => StatusCode::NEED_SETTINGS,
            AddonStatus::PermanentFailure => StatusCode::PERMANENT_FAILURE,
            AddonStatus::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            AddonStatus::Unknown => StatusCode::UNKNOWN,
        }
    }

    pub fn is_ok(self) -> bool {
        self == AddonStatus::Ok
    }
}

impl fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddonStatus::Ok => "ok",
            AddonStatus::NeedRestart => "need-restart",
            AddonStatus::NeedSettings => "need-settings",
            AddonStatus::PermanentFailure => "permanent-failure",
            AddonStatus::NotImplemented => "not-implemented",
            AddonStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One status change surfaced to the UI layer.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub addon_id: String,
    pub status: AddonStatus,
    pub detail: String,
}

/// Clonable sender half of the status channel.
///
/// Reporting never blocks the caller: [`report`](StatusReporter::report)
/// drops the event with a warning when the channel is full or closed, and
/// [`report_detached`](StatusReporter::report_detached) moves the send to a
/// short-lived thread for callers that must not even contend on the
/// channel.
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusReporter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Reporter with no listener; events are dropped. For embedders that do
    /// not surface add-on status.
    pub fn sink() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub fn report(&self, addon_id: &str, status: AddonStatus, detail: impl Into<String>) {
        let event = StatusEvent {
            addon_id: addon_id.to_string(),
            status,
            detail: detail.into(),
        };
        if let Err(err) = self.tx.try_send(event) {
            debug!(addon = %addon_id, %status, "status event dropped: {err}");
        }
    }

    /// One-shot notification off the caller's thread.
    pub fn report_detached(&self, addon_id: &str, status: AddonStatus, detail: impl Into<String>) {
        let tx = self.tx.clone();
        let event = StatusEvent {
            addon_id: addon_id.to_string(),
            status,
            detail: detail.into(),
        };
        std::thread::spawn(move || {
            if tx.blocking_send(event).is_err() {
                warn!("status listener gone, detached report dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for status in [
            AddonStatus::Ok,
            AddonStatus::NeedRestart,
            AddonStatus::NeedSettings,
            AddonStatus::PermanentFailure,
            AddonStatus::NotImplemented,
        ] {
            assert_eq!(AddonStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn unknown_codes_do_not_panic() {
        assert_eq!(AddonStatus::from_code(StatusCode(42)), AddonStatus::Unknown);
        assert_eq!(AddonStatus::from_code(StatusCode(-7)), AddonStatus::Unknown);
    }

    #[tokio::test]
    async fn report_delivers_without_blocking() {
        let (reporter, mut rx) = StatusReporter::channel(4);
        reporter.report("pvr.hts", AddonStatus::NeedRestart, "tuner changed");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.addon_id, "pvr.hts");
        assert_eq!(event.status, AddonStatus::NeedRestart);
    }

    #[tokio::test]
    async fn detached_report_arrives_from_its_own_thread() {
        let (reporter, mut rx) = StatusReporter::channel(1);
        reporter.report_detached("audio.flac", AddonStatus::NeedSettings, "");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, AddonStatus::NeedSettings);
    }

    #[test]
    fn sink_swallows_events() {
        let reporter = StatusReporter::sink();
        reporter.report("any", AddonStatus::PermanentFailure, "dropped");
    }
}
