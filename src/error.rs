//! Error types for the VitaBand alert engine

use thiserror::Error;

use crate::escalation::AttemptId;

/// Errors that can occur while evaluating or escalating readings
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Call placement failed: {0}")]
    CapabilityFailure(String),

    #[error("No pending escalation with id {0}")]
    NoPendingEscalation(AttemptId),

    #[error("Escalation {0} was already resolved")]
    EscalationAlreadyResolved(AttemptId),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Failure reported by the telephony collaborator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CallError(pub String);

impl From<CallError> for AlertError {
    fn from(e: CallError) -> Self {
        AlertError::CapabilityFailure(e.0)
    }
}
