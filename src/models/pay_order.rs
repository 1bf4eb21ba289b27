//! # Pay Order Model
//!
//! Business-level record of one payment intent accepted from an upstream system.
//!
//! ## Overview
//!
//! A `PayOrder` is created in `INIT` when an upstream system submits a payment and is
//! never deleted afterwards. Each lifecycle step stamps its own timestamp, so the row
//! doubles as an append-only trail of what happened to the payment.
//!
//! ## Database Schema
//!
//! Maps to `payflow_pay_orders`:
//! - `pay_order_no`: Primary business key (VARCHAR, unique)
//! - `(biz_identify_no, biz_unique_no)`: Upstream idempotency key (unique together)
//! - `status`: Status code, mutated only through `PayOrderStateMachine`
//! - `version`: Optimistic-lock counter, bumped by every conditional update
//! - `extend_info` / `biz_info`: Opaque JSONB, never interpreted by the core

use crate::state_machine::PayOrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Accounting direction of the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountingEntry {
    Debit,
    Credit,
}

impl AccountingEntry {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "DEBIT" => Some(Self::Debit),
            "CREDIT" => Some(Self::Credit),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for AccountingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Timestamp trail of an order; each field is written once by its transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayOrderTimestamps {
    pub gmt_accepted: Option<DateTime<Utc>>,
    pub gmt_payment_begin: Option<DateTime<Utc>>,
    pub gmt_payment_success: Option<DateTime<Utc>>,
    pub gmt_payment_failure: Option<DateTime<Utc>>,
    pub gmt_payment_closed: Option<DateTime<Utc>>,
    pub gmt_payment_bounced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayOrder {
    pub pay_order_no: String,
    pub sys_code: String,
    pub biz_identify_no: String,
    pub biz_unique_no: String,
    /// Positive amount in the minor currency unit
    pub money: i64,
    pub accounting_entry: AccountingEntry,
    pub status: PayOrderStatus,
    pub version: i64,
    pub timestamps: PayOrderTimestamps,
    pub channel_payment_trace_no: Option<String>,
    pub channel_dishonor_trace_no: Option<String>,
    pub channel_error_code: Option<String>,
    pub channel_error_msg: Option<String>,
    pub notify_uri: Option<String>,
    pub extend_info: Option<serde_json::Value>,
    pub biz_info: Option<serde_json::Value>,
    pub env: String,
}

/// New PayOrder for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayOrder {
    pub sys_code: String,
    pub biz_identify_no: String,
    pub biz_unique_no: String,
    pub money: i64,
    pub accounting_entry: AccountingEntry,
    /// Channel endpoint the payment leg is sent to
    pub request_addr: String,
    /// Channel-specific payload forwarded verbatim to the adapter
    pub request_params: serde_json::Value,
    pub notify_uri: Option<String>,
    pub extend_info: Option<serde_json::Value>,
    pub biz_info: Option<serde_json::Value>,
    pub env: String,
}

impl NewPayOrder {
    /// Reject structurally wrong input before anything is persisted
    pub fn validate(&self) -> Result<(), String> {
        if self.money <= 0 {
            return Err(format!("money must be positive, got {}", self.money));
        }
        if self.biz_identify_no.trim().is_empty() {
            return Err("biz_identify_no must not be blank".to_string());
        }
        if self.biz_unique_no.trim().is_empty() {
            return Err("biz_unique_no must not be blank".to_string());
        }
        if self.sys_code.trim().is_empty() {
            return Err("sys_code must not be blank".to_string());
        }
        if self.request_addr.trim().is_empty() {
            return Err("request_addr must not be blank".to_string());
        }
        Ok(())
    }

    /// Build the INIT order row for this submission
    pub fn into_pay_order(&self, pay_order_no: String, now: DateTime<Utc>) -> PayOrder {
        PayOrder {
            pay_order_no,
            sys_code: self.sys_code.clone(),
            biz_identify_no: self.biz_identify_no.clone(),
            biz_unique_no: self.biz_unique_no.clone(),
            money: self.money,
            accounting_entry: self.accounting_entry,
            status: PayOrderStatus::Init,
            version: 0,
            timestamps: PayOrderTimestamps {
                gmt_accepted: Some(now),
                ..Default::default()
            },
            channel_payment_trace_no: None,
            channel_dishonor_trace_no: None,
            channel_error_code: None,
            channel_error_msg: None,
            notify_uri: self.notify_uri.clone(),
            extend_info: self.extend_info.clone(),
            biz_info: self.biz_info.clone(),
            env: self.env.clone(),
        }
    }
}

/// Generate a globally unique pay order number
pub fn generate_pay_order_no() -> String {
    format!("PO{}", uuid::Uuid::new_v4().simple())
}

impl PayOrder {
    /// Upstream-visible outcome; never carries channel request retry history
    pub fn notification_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "payOrderNo": self.pay_order_no,
            "sysCode": self.sys_code,
            "bizIdentifyNo": self.biz_identify_no,
            "bizUniqueNo": self.biz_unique_no,
            "money": self.money,
            "accountingEntry": self.accounting_entry,
            "status": self.status,
            "channelPaymentTraceNo": self.channel_payment_trace_no,
            "channelDishonorTraceNo": self.channel_dishonor_trace_no,
            "channelErrorCode": self.channel_error_code,
            "channelErrorMsg": self.channel_error_msg,
        })
    }
}
