//! # Orchestration
//!
//! Everything that moves payment work forward over time.
//!
//! ## Core Components
//!
//! - **RequestScheduler**: polls due channel requests, claims, dispatches, classifies, applies
//! - **RequestClaimer**: the claim lease, one conditional write per request
//! - **ErrorClassifier**: maps dispatch failures onto the taxonomy and a retry decision
//! - **IdempotencyGuard**: duplicate suppression for orders, requests and callbacks
//! - **RequestOutcomeProcessor**: applies one outcome to both state machines
//! - **PaymentService**: upstream-facing entry points (accept, close, callback, bounce)

pub mod error_classifier;
pub mod idempotency;
pub mod outcome_processor;
pub mod payment_service;
pub mod request_claimer;
pub mod request_scheduler;

pub use error_classifier::{
    ClassifiedError, ErrorClassification, ErrorClassifier, ErrorClassifierConfig, ErrorCode,
    ErrorContext, MiddleType, RetryDecision, StandardErrorClassifier,
};
pub use idempotency::{CallbackAdmission, IdempotencyGuard, OrderAdmission, RequestAdmission};
pub use outcome_processor::{RequestOutcome, RequestOutcomeProcessor};
pub use payment_service::{
    AcceptedPayment, CallbackOutcome, CallbackResult, ChannelCallback, PaymentService,
};
pub use request_claimer::RequestClaimer;
pub use request_scheduler::{ProcessOutcome, RequestScheduler, SchedulerRunSummary};

/// std → chrono, saturating instead of failing on absurd configured values
pub(crate) fn to_chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}
