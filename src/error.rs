//! Error types for the payflow core.
//!

use crate::config::ConfigurationError;
use crate::orchestration::error_classifier::ClassifiedError;
use crate::persistence::PersistenceError;
use crate::state_machine::errors::StateMachineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayflowError {
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A payment request for the same business key already reached a terminal status
    #[error("Idempotent request: {request_type} for {biz_identify_no}/{biz_unique_no} was already decided as {status}")]
    IdempotentRequest {
        biz_identify_no: String,
        biz_unique_no: String,
        request_type: String,
        status: String,
    },

    /// The request outcome is committed but its order did not follow.
    /// `RequestOutcomeProcessor::reconcile_order` brings the order back in line.
    #[error("Pay order {pay_order_no} not settled after request {request_id} committed: {reason}")]
    OrderSettlementFailed {
        pay_order_no: String,
        request_id: i64,
        reason: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pay order not found: {0}")]
    PayOrderNotFound(String),

    #[error("Channel request not found: {0}")]
    ChannelRequestNotFound(String),

    /// A failure already mapped onto the error taxonomy
    #[error("{0}")]
    Classified(ClassifiedError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PayflowError {
    fn from(error: serde_json::Error) -> Self {
        PayflowError::InvalidParameter(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for PayflowError {
    fn from(err: sqlx::Error) -> Self {
        PayflowError::Persistence(PersistenceError::Database(err))
    }
}

pub type Result<T> = std::result::Result<T, PayflowError>;
