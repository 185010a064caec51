//! Operator control messages

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::SearchFilters;
use crate::queue::QueueError;
use crate::state::StateError;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A run is already active")]
    AlreadyRunning,

    #[error("Orchestrator channel closed")]
    ChannelClosed,

    #[error("Invitation to {profile_id} was sent but window '{window}' was already full")]
    LimitAfterSend { profile_id: String, window: String },

    #[error("Crash recovery failed: {0:#}")]
    Recovery(eyre::Report),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Commands from the operator surface to the orchestrator worker
#[derive(Debug)]
pub enum Control {
    Start {
        filters: SearchFilters,
        reply: oneshot::Sender<Result<String, OrchestratorError>>,
    },
    Stop,
    Pause,
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn test_recovery_error_keeps_cause() {
        let failed: Result<(), StateError> = Err(StateError::StoreError("disk I/O error".to_string()));
        let report = failed.wrap_err("Failed to list open sessions").unwrap_err();

        let err = OrchestratorError::Recovery(report);
        assert_eq!(
            err.to_string(),
            "Crash recovery failed: Failed to list open sessions: Store error: disk I/O error"
        );
    }
}
