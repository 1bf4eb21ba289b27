//! # System Constants
//!
//! Core constants that define the operational boundaries of the payment
//! request pipeline.

// Re-export state types for convenience
pub use crate::state_machine::{ChannelRequestStatus, PayOrderStatus};

/// Close reasons recorded on a ChannelRequest when it leaves the retry loop
pub mod close_reasons {
    /// The classified failure is not marked retryable
    pub const NOT_RETRYABLE_REQUEST: &str = "NOT_RETRYABLE_REQUEST";
    /// The configured retry cap was reached
    pub const RETRY_LIMIT_EXCEEDED: &str = "RETRY_LIMIT_EXCEEDED";
    /// The owning order was closed by an operator
    pub const ORDER_CLOSED: &str = "ORDER_CLOSED";
}

/// Structured log event names for lifecycle changes
pub mod events {
    pub const ORDER_ACCEPTED: &str = "order.accepted";
    pub const ORDER_TRANSITIONED: &str = "order.transitioned";
    pub const REQUEST_CREATED: &str = "request.created";
    pub const REQUEST_CLAIMED: &str = "request.claimed";
    pub const REQUEST_TRANSITIONED: &str = "request.transitioned";
    pub const CALLBACK_DISCARDED: &str = "callback.discarded";
}

/// System-wide defaults
pub mod system {
    /// Linear backoff step: the n-th retry is scheduled n * 300s after the failure
    pub const RETRY_INTERVAL_SECONDS: u64 = 300;

    /// Bounded re-read attempts when an order update loses an optimistic-lock race
    pub const ORDER_UPDATE_MAX_ATTEMPTS: u32 = 3;

    pub const DEFAULT_ENV: &str = "development";

    pub const PAYFLOW_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
