use crate::persistence::PersistenceError;
use thiserror::Error;

/// Error types for state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    /// A status code that does not resolve to a known status
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The row changed between read and conditional write
    #[error("Concurrent modification detected for {entity} {entity_id}")]
    ConcurrentModification { entity: &'static str, entity_id: String },

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl StateMachineError {
    /// Lost an optimistic-lock race rather than hit an illegal transition
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

pub(crate) fn invalid_transition(
    from: impl ToString,
    to: impl ToString,
) -> StateMachineError {
    StateMachineError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
