//! # Channel Request Model
//!
//! One outbound interaction series belonging to a `PayOrder`: the payment call
//! itself, or one of the notifications about its outcome.
//!
//! `(biz_identify_no, biz_unique_no, request_type)` is unique. The request type code
//! doubles as dispatch priority so that money movement is attempted before any
//! notification about it.

use crate::state_machine::ChannelRequestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    Payment,
    BasicNotification,
    BouncedNotification,
}

impl RequestType {
    /// Numeric code, also the dispatch priority (lower goes first)
    pub fn code(&self) -> i16 {
        match self {
            Self::Payment => 1,
            Self::BasicNotification => 2,
            Self::BouncedNotification => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Payment),
            2 => Some(Self::BasicNotification),
            3 => Some(Self::BouncedNotification),
            _ => None,
        }
    }

    pub fn is_payment(&self) -> bool {
        matches!(self, Self::Payment)
    }

    pub fn is_notification(&self) -> bool {
        !self.is_payment()
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payment => write!(f, "payment"),
            Self::BasicNotification => write!(f, "basicNotification"),
            Self::BouncedNotification => write!(f, "bouncedNotification"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Surrogate key assigned by the store
    pub id: i64,
    pub pay_order_no: String,
    pub biz_identify_no: String,
    pub biz_unique_no: String,
    pub request_type: RequestType,
    pub retry_count: i32,
    pub request_addr: String,
    pub status: ChannelRequestStatus,
    /// Lease/optimistic-lock counter; every conditional update bumps it
    pub version: i64,
    pub gmt_create: DateTime<Utc>,
    /// Earliest time the scheduler may pick the row up
    pub gmt_next_execution: DateTime<Utc>,
    pub gmt_last_execution: Option<DateTime<Utc>>,
    pub request_params: serde_json::Value,
    pub request_response: Option<String>,
    /// Channel-side reference of a successful interaction
    pub channel_trace_no: Option<String>,
    pub callback_params: Option<serde_json::Value>,
    pub request_exception: Option<String>,
    pub close_reason: Option<String>,
    pub env: String,
}

impl ChannelRequest {
    pub fn business_key(&self) -> (&str, &str, RequestType) {
        (&self.biz_identify_no, &self.biz_unique_no, self.request_type)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_schedulable() && self.gmt_next_execution <= now
    }
}

/// New ChannelRequest for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannelRequest {
    pub pay_order_no: String,
    pub biz_identify_no: String,
    pub biz_unique_no: String,
    pub request_type: RequestType,
    pub request_addr: String,
    pub request_params: serde_json::Value,
    pub env: String,
}

impl NewChannelRequest {
    /// INIT row, due immediately
    pub fn into_channel_request(self, now: DateTime<Utc>) -> ChannelRequest {
        ChannelRequest {
            id: 0,
            pay_order_no: self.pay_order_no,
            biz_identify_no: self.biz_identify_no,
            biz_unique_no: self.biz_unique_no,
            request_type: self.request_type,
            retry_count: 0,
            request_addr: self.request_addr,
            status: ChannelRequestStatus::Init,
            version: 0,
            gmt_create: now,
            gmt_next_execution: now,
            gmt_last_execution: None,
            request_params: self.request_params,
            request_response: None,
            channel_trace_no: None,
            callback_params: None,
            request_exception: None,
            close_reason: None,
            env: self.env,
        }
    }
}
