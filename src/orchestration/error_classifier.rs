//! # Dispatch Error Classification
//!
//! Maps a failed channel or notification dispatch onto the error taxonomy and
//! decides what the scheduler does next with the request.
//!
//! ## Taxonomy
//!
//! Every failure is a [`ClassifiedError`]: a [`MiddleType`] naming which party
//! failed and in what way, a numeric [`ErrorCode`] and a `retryable` flag. The
//! flag comes from the code's table entry unless the raiser marked it
//! explicitly. Anything not listed as retryable is **not** retried.
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────┐     ┌────────────────────┐
//! │ DispatchError  │────▶│ ErrorClassifier │────▶│ Retry { delay }    │
//! │ + ErrorContext │     │                 │     │ Close { reason }   │
//! └────────────────┘     └─────────────────┘     └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use payflow_core::channel::DispatchError;
//! use payflow_core::models::RequestType;
//! use payflow_core::orchestration::error_classifier::{
//!     ErrorClassifier, ErrorContext, StandardErrorClassifier,
//! };
//! use std::time::Duration;
//!
//! let classifier = StandardErrorClassifier::new();
//! let context = ErrorContext {
//!     request_id: 7,
//!     pay_order_no: "PO1".to_string(),
//!     request_type: RequestType::Payment,
//!     retry_count: 1,
//!     execution_duration: Duration::from_secs(10),
//! };
//!
//! let classification = classifier.classify(&DispatchError::Timeout(Duration::from_secs(10)), &context);
//! assert_eq!(classification.retry_delay(), Some(Duration::from_secs(600)));
//! ```

use crate::channel::DispatchError;
use crate::config::SchedulerConfig;
use crate::constants::close_reasons;
use crate::constants::system::RETRY_INTERVAL_SECONDS;
use crate::models::RequestType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which party failed, and whether it was a business answer or a system fault.
///
/// `SELF` is this service, `SECOND` the in-house gateways it calls (wallet,
/// channel gateway), `THIRD` the external networks and merchant endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MiddleType {
    SelfBiz,
    SelfSys,
    SecondBiz,
    SecondSys,
    ThirdBiz,
    ThirdSys,
}

impl MiddleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfBiz => "SELF_BIZ",
            Self::SelfSys => "SELF_SYS",
            Self::SecondBiz => "SECOND_BIZ",
            Self::SecondSys => "SECOND_SYS",
            Self::ThirdBiz => "THIRD_BIZ",
            Self::ThirdSys => "THIRD_SYS",
        }
    }

    pub fn is_business(&self) -> bool {
        matches!(self, Self::SelfBiz | Self::SecondBiz | Self::ThirdBiz)
    }
}

impl fmt::Display for MiddleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error code table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParameter,
    InvalidModel,
    InvalidStatus,
    InvalidTransition,
    IdempotentRequest,
    NotRetryableRequest,
    DefaultSysError,
    ChannelNotConfigured,
    AcceptFailure,
    SecondBizRejected,
    RpcInvokeError,
    WalletTransientError,
    ThirdBizRejected,
    DispatchTimeout,
    NotifyDeliveryFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 15] = [
        Self::InvalidParameter,
        Self::InvalidModel,
        Self::InvalidStatus,
        Self::InvalidTransition,
        Self::IdempotentRequest,
        Self::NotRetryableRequest,
        Self::DefaultSysError,
        Self::ChannelNotConfigured,
        Self::AcceptFailure,
        Self::SecondBizRejected,
        Self::RpcInvokeError,
        Self::WalletTransientError,
        Self::ThirdBizRejected,
        Self::DispatchTimeout,
        Self::NotifyDeliveryFailed,
    ];

    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidParameter => 1001,
            Self::InvalidModel => 1002,
            Self::InvalidStatus => 1003,
            Self::InvalidTransition => 1004,
            Self::IdempotentRequest => 1005,
            Self::NotRetryableRequest => 1006,
            Self::DefaultSysError => 2000,
            Self::ChannelNotConfigured => 2001,
            Self::AcceptFailure => 2002,
            Self::SecondBizRejected => 3001,
            Self::RpcInvokeError => 4001,
            Self::WalletTransientError => 4002,
            Self::ThirdBizRejected => 5001,
            Self::DispatchTimeout => 6001,
            Self::NotifyDeliveryFailed => 6002,
        }
    }

    pub fn middle_type(&self) -> MiddleType {
        match self {
            Self::InvalidParameter
            | Self::InvalidModel
            | Self::InvalidStatus
            | Self::InvalidTransition
            | Self::IdempotentRequest
            | Self::NotRetryableRequest => MiddleType::SelfBiz,
            Self::DefaultSysError | Self::ChannelNotConfigured | Self::AcceptFailure => {
                MiddleType::SelfSys
            }
            Self::SecondBizRejected => MiddleType::SecondBiz,
            Self::RpcInvokeError | Self::WalletTransientError => MiddleType::SecondSys,
            Self::ThirdBizRejected => MiddleType::ThirdBiz,
            Self::DispatchTimeout | Self::NotifyDeliveryFailed => MiddleType::ThirdSys,
        }
    }

    /// Table default; only these codes are retried unless the raiser says otherwise
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcceptFailure
                | Self::RpcInvokeError
                | Self::WalletTransientError
                | Self::DispatchTimeout
                | Self::NotifyDeliveryFailed
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::InvalidModel => "INVALID_MODEL",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::IdempotentRequest => "IDEMPOTENT_REQUEST",
            Self::NotRetryableRequest => "NOT_RETRYABLE_REQUEST",
            Self::DefaultSysError => "DEFAULT_SYS_ERROR",
            Self::ChannelNotConfigured => "CHANNEL_NOT_CONFIGURED",
            Self::AcceptFailure => "ACCEPT_FAILURE",
            Self::SecondBizRejected => "SECOND_BIZ_REJECTED",
            Self::RpcInvokeError => "RPC_INVOKE_ERROR",
            Self::WalletTransientError => "WALLET_TRANSIENT_ERROR",
            Self::ThirdBizRejected => "THIRD_BIZ_REJECTED",
            Self::DispatchTimeout => "DISPATCH_TIMEOUT",
            Self::NotifyDeliveryFailed => "NOTIFY_DELIVERY_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// A failure in its structured form; decisions never look at raw exception text
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{middle_type}/{code}] {message}")]
pub struct ClassifiedError {
    pub middle_type: MiddleType,
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ClassifiedError {
    /// Build an error whose retryable flag comes from the code table
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            middle_type: code.middle_type(),
            code,
            message: message.into(),
            retryable: code.default_retryable(),
        }
    }

    /// Explicitly mark the error retryable or not, overriding the table
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Context information for error classification
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: i64,
    pub pay_order_no: String,
    pub request_type: RequestType,
    /// Failures recorded on the request before this one
    pub retry_count: i32,
    pub execution_duration: Duration,
}

/// What the scheduler should do with the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Mark FAILED and make the request due again after `delay`
    Retry { delay: Duration },
    /// Leave the retry loop with the given close reason
    Close { reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub error: ClassifiedError,
    pub decision: RetryDecision,
}

impl ErrorClassification {
    pub fn is_retryable(&self) -> bool {
        matches!(self.decision, RetryDecision::Retry { .. })
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self.decision {
            RetryDecision::Retry { delay } => Some(delay),
            RetryDecision::Close { .. } => None,
        }
    }
}

/// Trait for error classification strategies
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &DispatchError, context: &ErrorContext) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Configuration for error classification behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifierConfig {
    /// Linear backoff step
    pub retry_interval: Duration,
    pub max_retry_count: Option<u32>,
}

impl Default for ErrorClassifierConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(RETRY_INTERVAL_SECONDS),
            max_retry_count: None,
        }
    }
}

impl From<&SchedulerConfig> for ErrorClassifierConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
            max_retry_count: config.max_retry_count,
        }
    }
}

/// Table-driven classifier with linear backoff
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    config: ErrorClassifierConfig,
}

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ErrorClassifierConfig) -> Self {
        Self { config }
    }

    /// Reduce a dispatch failure to its structured form
    pub fn to_classified(error: &DispatchError) -> ClassifiedError {
        match error {
            DispatchError::Classified(classified) => classified.clone(),
            DispatchError::Timeout(after) => ClassifiedError::new(
                ErrorCode::DispatchTimeout,
                format!("dispatch timed out after {}ms", after.as_millis()),
            ),
            DispatchError::Transport(reason) => {
                ClassifiedError::new(ErrorCode::RpcInvokeError, reason.clone())
            }
            DispatchError::Rejected { code, message } => {
                ClassifiedError::new(ErrorCode::ThirdBizRejected, format!("{code}: {message}"))
            }
            DispatchError::NotConfigured(channel) => ClassifiedError::new(
                ErrorCode::ChannelNotConfigured,
                format!("no channel adapter registered for '{channel}'"),
            ),
            DispatchError::Unexpected { message, retryable } => {
                ClassifiedError::new(ErrorCode::DefaultSysError, message.clone())
                    .with_retryable(*retryable)
            }
        }
    }

    /// Delay before the `next_retry_count`-th retry: interval * next_retry_count
    pub fn backoff_delay(&self, next_retry_count: u32) -> Duration {
        self.config.retry_interval * next_retry_count
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, error: &DispatchError, context: &ErrorContext) -> ErrorClassification {
        let classified = Self::to_classified(error);

        if !classified.retryable {
            return ErrorClassification {
                error: classified,
                decision: RetryDecision::Close {
                    reason: close_reasons::NOT_RETRYABLE_REQUEST,
                },
            };
        }

        let next_retry_count = u32::try_from(context.retry_count.max(0))
            .unwrap_or(u32::MAX)
            .saturating_add(1);

        if let Some(max) = self.config.max_retry_count {
            if next_retry_count > max {
                return ErrorClassification {
                    error: classified,
                    decision: RetryDecision::Close {
                        reason: close_reasons::RETRY_LIMIT_EXCEEDED,
                    },
                };
            }
        }

        ErrorClassification {
            error: classified,
            decision: RetryDecision::Retry {
                delay: self.backoff_delay(next_retry_count),
            },
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}
