//! Error types surfaced at the session boundary.

use crate::session::SessionState;

/// Failures reported by a tuner session.
///
/// Every acquisition-related variant moves the session to
/// [`SessionState::Failed`]; none of them is retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TunerError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("audio device failed to initialize: {0}")]
    DeviceInitFailure(String),
    #[error("audio device failed to start: {0}")]
    StartFailure(String),
    #[error("acquisition fault while listening: {0}")]
    AcquisitionFault(String),
    #[error("audio device failed to stop: {0}")]
    StopFailure(String),
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },
    #[error("tuner session worker is no longer running")]
    SessionClosed,
}

pub type TunerResult<T> = Result<T, TunerError>;

impl TunerError {
    /// Whether this error moved the session into the failed state.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            TunerError::InvalidTransition { .. } | TunerError::SessionClosed
        )
    }
}
