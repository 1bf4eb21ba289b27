use super::states::{ChannelRequestStatus, PayOrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events that can trigger pay order status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PayOrderEvent {
    /// First dispatch of the payment leg
    Begin,
    /// Channel accepted the payment
    Succeed { trace_no: Option<String> },
    /// Payment leg given up on
    Fail { error_code: String, error_msg: String },
    /// Operator cancellation
    Close { reason: String },
    /// Channel reversed a successful payment
    Bounce { dishonor_trace_no: Option<String> },
}

impl PayOrderEvent {
    pub fn target_status(&self) -> PayOrderStatus {
        match self {
            Self::Begin => PayOrderStatus::Pending,
            Self::Succeed { .. } => PayOrderStatus::Success,
            Self::Fail { .. } => PayOrderStatus::Failed,
            Self::Close { .. } => PayOrderStatus::Closed,
            Self::Bounce { .. } => PayOrderStatus::Bounced,
        }
    }

    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Succeed { .. } => "succeed",
            Self::Fail { .. } => "fail",
            Self::Close { .. } => "close",
            Self::Bounce { .. } => "bounce",
        }
    }
}

/// Events that can trigger channel request status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelRequestEvent {
    /// A worker takes the lease until `lease_until`
    Claim { lease_until: DateTime<Utc> },
    /// Channel accepted the request
    Succeed {
        response: Option<String>,
        trace_no: Option<String>,
        callback_params: Option<Value>,
    },
    /// Retryable failure; the request becomes due again at `next_execution`
    Fail {
        exception: String,
        next_execution: DateTime<Utc>,
    },
    /// Leave the retry loop for good
    Close {
        reason: String,
        exception: Option<String>,
    },
}

impl ChannelRequestEvent {
    pub fn target_status(&self) -> ChannelRequestStatus {
        match self {
            Self::Claim { .. } => ChannelRequestStatus::Pending,
            Self::Succeed { .. } => ChannelRequestStatus::Success,
            Self::Fail { .. } => ChannelRequestStatus::Failed,
            Self::Close { .. } => ChannelRequestStatus::Closed,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Succeed { .. } => "succeed",
            Self::Fail { .. } => "fail",
            Self::Close { .. } => "close",
        }
    }
}
