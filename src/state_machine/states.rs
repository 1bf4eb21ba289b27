use serde::{Deserialize, Serialize};
use std::fmt;

/// Business-order status. Persisted as its upper-case code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayOrderStatus {
    /// Accepted, no channel interaction yet
    Init,
    /// Payment leg has been dispatched at least once
    Pending,
    /// Funds moved
    Success,
    /// Payment leg was given up on
    Failed,
    /// Closed by an operator before completion
    Closed,
    /// Funds moved and were later reversed by the channel
    Bounced,
}

impl PayOrderStatus {
    pub const ALL: [PayOrderStatus; 6] = [
        Self::Init,
        Self::Pending,
        Self::Success,
        Self::Failed,
        Self::Closed,
        Self::Bounced,
    ];

    /// Resolve a persisted status code; `None` for anything unknown
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "INIT" => Some(Self::Init),
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "CLOSED" => Some(Self::Closed),
            "BOUNCED" => Some(Self::Bounced),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
            Self::Bounced => "BOUNCED",
        }
    }

    /// SUCCESS, FAILED, CLOSED and BOUNCED are final
    pub fn is_final_status(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Closed | Self::Bounced
        )
    }

    pub fn is_success_final_status(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Final statuses where the upstream did not end up paid
    pub fn is_bad_final_status(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed | Self::Bounced)
    }

    pub fn is_bounced(&self) -> bool {
        matches!(self, Self::Bounced)
    }

    /// INIT and PENDING: money has not moved yet
    pub fn is_unpaid(&self) -> bool {
        matches!(self, Self::Init | Self::Pending)
    }
}

impl fmt::Display for PayOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for PayOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("Invalid pay order status: {s}"))
    }
}

impl Default for PayOrderStatus {
    fn default() -> Self {
        Self::Init
    }
}

/// Status of one outbound attempt series (payment call or notification).
///
/// FAILED is not terminal here: a failed request stays pickable for retry,
/// unlike a FAILED pay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelRequestStatus {
    /// Created, never dispatched
    Init,
    /// Claimed by a worker, attempt in flight or lease not yet expired
    Pending,
    /// Accepted by the channel; fixed point
    Success,
    /// Last attempt failed with a retryable error
    Failed,
    /// Given up on; fixed point
    Closed,
}

impl ChannelRequestStatus {
    pub const ALL: [ChannelRequestStatus; 5] = [
        Self::Init,
        Self::Pending,
        Self::Success,
        Self::Failed,
        Self::Closed,
    ];

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "INIT" => Some(Self::Init),
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Closed)
    }

    /// Statuses the scheduler polls for
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Init | Self::Pending | Self::Failed)
    }
}

impl fmt::Display for ChannelRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for ChannelRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("Invalid channel request status: {s}"))
    }
}

impl Default for ChannelRequestStatus {
    fn default() -> Self {
        Self::Init
    }
}
