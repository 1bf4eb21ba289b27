//! HTTP delivery of order outcomes to the upstream `notify_uri`.

use super::{ChannelAdapter, ChannelResponse, DispatchError};
use crate::config::NotificationConfig;
use crate::error::{PayflowError, Result};
use crate::models::ChannelRequest;
use crate::orchestration::error_classifier::{ClassifiedError, ErrorCode};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Posts the notification payload as JSON to the request address.
///
/// 2xx is delivered, 5xx and transport failures are retryable, any other
/// status is a refusal that retrying cannot fix.
pub struct HttpNotificationSender {
    client: Client,
    timeout: Duration,
}

impl HttpNotificationSender {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PayflowError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: config.timeout(),
        })
    }

    fn map_status(status: StatusCode, body: String) -> std::result::Result<ChannelResponse, DispatchError> {
        if status.is_success() {
            return Ok(ChannelResponse {
                body: Some(body),
                ..Default::default()
            });
        }

        if status.is_server_error() {
            return Err(DispatchError::Classified(ClassifiedError::new(
                ErrorCode::NotifyDeliveryFailed,
                format!("notify endpoint answered {status}"),
            )));
        }

        Err(DispatchError::Rejected {
            code: status.as_u16().to_string(),
            message: body,
        })
    }
}

#[async_trait]
impl ChannelAdapter for HttpNotificationSender {
    fn name(&self) -> &str {
        "http-notification"
    }

    async fn dispatch(&self, request: &ChannelRequest) -> std::result::Result<ChannelResponse, DispatchError> {
        debug!(
            request_id = request.id,
            pay_order_no = %request.pay_order_no,
            request_type = %request.request_type,
            "Posting notification"
        );

        let response = self
            .client
            .post(&request.request_addr)
            .json(&request.request_params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Self::map_status(status, body)
    }
}
