//! # Channel Adapters
//!
//! Outbound side of the pipeline. A [`ChannelAdapter`] performs one dispatch of
//! a [`ChannelRequest`] and reports either a [`ChannelResponse`] or a
//! [`DispatchError`]; the scheduler never looks past that outcome.
//!
//! Payment requests are routed by the scheme of their `request_addr`
//! (`card://visa` goes to the adapter registered as `card`). Notification
//! requests all go to the single notification sender.

pub mod http_notification;

use crate::models::ChannelRequest;
use crate::orchestration::error_classifier::ClassifiedError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use http_notification::HttpNotificationSender;

/// Successful channel answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelResponse {
    /// Raw response body, stored as `request_response`
    pub body: Option<String>,
    /// Channel-side trace number of the money movement
    pub trace_no: Option<String>,
    /// The channel reports that an earlier successful payment was reversed
    pub reversal: bool,
    pub callback_params: Option<Value>,
}

impl ChannelResponse {
    pub fn accepted(trace_no: impl Into<String>) -> Self {
        Self {
            trace_no: Some(trace_no.into()),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Already mapped onto the taxonomy by the adapter
    #[error("{0}")]
    Classified(ClassifiedError),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Definitive business refusal from the far side
    #[error("Rejected by channel ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("No channel adapter registered for '{0}'")]
    NotConfigured(String),

    /// Anything the adapter could not classify; retried only when explicitly marked
    #[error("Unexpected dispatch failure: {message}")]
    Unexpected { message: String, retryable: bool },
}

impl From<ClassifiedError> for DispatchError {
    fn from(error: ClassifiedError) -> Self {
        Self::Classified(error)
    }
}

/// One underlying channel (card network, wallet, merchant notification endpoint)
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, request: &ChannelRequest) -> Result<ChannelResponse, DispatchError>;
}

pub type ChannelAdapterRef = Arc<dyn ChannelAdapter>;

/// Channel name of a payment address: the scheme, or the whole address without one
pub fn channel_name(request_addr: &str) -> &str {
    request_addr
        .split_once("://")
        .map_or(request_addr, |(scheme, _)| scheme)
}

/// Routing table from requests to adapters; adapters may be registered at runtime
#[derive(Default)]
pub struct ChannelRegistry {
    payment_adapters: RwLock<HashMap<String, ChannelAdapterRef>>,
    notification_sender: RwLock<Option<ChannelAdapterRef>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_payment_adapter(&self, channel: impl Into<String>, adapter: ChannelAdapterRef) {
        let channel = channel.into();
        tracing::debug!(channel = %channel, adapter = adapter.name(), "Registered payment adapter");
        self.payment_adapters.write().insert(channel, adapter);
    }

    pub fn set_notification_sender(&self, sender: ChannelAdapterRef) {
        tracing::debug!(adapter = sender.name(), "Registered notification sender");
        *self.notification_sender.write() = Some(sender);
    }

    pub fn resolve(&self, request: &ChannelRequest) -> Result<ChannelAdapterRef, DispatchError> {
        if request.request_type.is_notification() {
            return self
                .notification_sender
                .read()
                .clone()
                .ok_or_else(|| DispatchError::NotConfigured(request.request_type.to_string()));
        }

        let channel = channel_name(&request.request_addr);
        self.payment_adapters
            .read()
            .get(channel)
            .cloned()
            .ok_or_else(|| DispatchError::NotConfigured(channel.to_string()))
    }

    pub fn payment_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.payment_adapters.read().keys().cloned().collect();
        channels.sort();
        channels
    }
}
