//! Error taxonomy for tracking, sync and route reconstruction.
//!
//! Only a few conditions ever reach the caller as errors. Low-quality fixes are
//! filtering decisions, anomaly detection only annotates, and per-sample sync
//! failures or per-batch route failures are logged and absorbed.

use std::time::Duration;

/// Errors surfaced by the tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Tracking is disabled for the subject. Terminal for the current render.
    #[error("tracking is disabled for subject {subject_id}")]
    TrackingDisabled { subject_id: String },

    /// Network or transport failure talking to a remote collaborator.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The directions provider answered with a non-OK status.
    #[error("directions provider returned status {status}")]
    Provider { status: String },

    /// A configured endpoint is not a usable base URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The device could not produce a position fix.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// The device did not produce a position fix in time.
    #[error("position request timed out after {0:?}")]
    PositionTimeout(Duration),

    /// Local sample buffer failure.
    #[error("local buffer error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A buffer operation on the blocking pool panicked or was cancelled.
    #[error("buffer task failed: {0}")]
    BufferTask(String),

    /// A stored record could not be decoded.
    #[error("corrupt buffer record: {0}")]
    CorruptRecord(String),

    #[error("tracking session already active")]
    SessionActive,

    #[error("tracking session not active")]
    SessionInactive,
}

impl TrackerError {
    /// Whether the operation may succeed if retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::Transport(_)
                | TrackerError::Provider { .. }
                | TrackerError::PositionUnavailable(_)
                | TrackerError::PositionTimeout(_)
        )
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_disabled_is_terminal() {
        let err = TrackerError::TrackingDisabled { subject_id: "emp-7".into() };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "tracking is disabled for subject emp-7");
    }

    #[test]
    fn test_transport_is_retryable() {
        assert!(TrackerError::Transport("connection reset".into()).is_retryable());
        assert!(TrackerError::PositionTimeout(Duration::from_secs(10)).is_retryable());
        assert!(!TrackerError::SessionActive.is_retryable());
    }
}
