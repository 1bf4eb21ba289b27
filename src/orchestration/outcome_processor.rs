//! # Request Outcome Processor
//!
//! Applies the outcome of one channel interaction to both lifecycles. Used by
//! the scheduler after a dispatch and by the payment service for inbound
//! callbacks, so a callback and a polled result take exactly the same path.
//!
//! The request transition always happens first and is conditional on the
//! observed `(status, version)`. Only the writer that wins it moves on to the
//! order, which is what keeps a replayed success from being applied twice.
//!
//! ## Order effects of a payment request
//!
//! | request outcome       | order transition            | notification          |
//! |-----------------------|-----------------------------|-----------------------|
//! | success               | → SUCCESS                   | basicNotification     |
//! | success with reversal | → SUCCESS → BOUNCED         | basic + bounced       |
//! | retryable failure     | none                        | none                  |
//! | closed                | → FAILED with error code    | basicNotification     |
//!
//! Notification requests only ever change their own row.
//!
//! Once the request row is committed its outcome stands. If the order write
//! that follows fails, the caller gets `OrderSettlementFailed` rather than a
//! conflict, and `reconcile_order` derives the missing order transition from
//! the decided payment request.

use super::error_classifier::{ErrorClassification, RetryDecision};
use super::idempotency::IdempotencyGuard;
use super::to_chrono_duration;
use crate::channel::ChannelResponse;
use crate::constants::close_reasons;
use crate::error::{PayflowError, Result};
use crate::models::{ChannelRequest, NewChannelRequest, PayOrder, RequestType};
use crate::persistence::{ChannelRequestStoreRef, PayOrderStoreRef};
use crate::state_machine::{
    ChannelRequestEvent, ChannelRequestStateMachine, ChannelRequestStatus, PayOrderEvent,
    PayOrderStateMachine, PayOrderStatus,
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument};

/// What happened to the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Retrying {
        retry_count: i32,
        next_execution: DateTime<Utc>,
    },
    Closed {
        reason: String,
    },
}

#[derive(Clone)]
pub struct RequestOutcomeProcessor {
    orders: PayOrderStateMachine,
    requests: ChannelRequestStateMachine,
    guard: IdempotencyGuard,
}

impl RequestOutcomeProcessor {
    pub fn new(order_store: PayOrderStoreRef, request_store: ChannelRequestStoreRef) -> Self {
        Self {
            orders: PayOrderStateMachine::new(order_store.clone()),
            requests: ChannelRequestStateMachine::new(request_store.clone()),
            guard: IdempotencyGuard::new(order_store, request_store),
        }
    }

    pub fn order_machine(&self) -> &PayOrderStateMachine {
        &self.orders
    }

    pub fn request_machine(&self) -> &ChannelRequestStateMachine {
        &self.requests
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Move an INIT order to PENDING on the first dispatch of its payment leg
    pub async fn begin_payment(&self, pay_order_no: &str, now: DateTime<Utc>) -> Result<PayOrder> {
        let order = self
            .orders
            .store()
            .find_by_pay_order_no(pay_order_no)
            .await?
            .ok_or_else(|| crate::error::PayflowError::PayOrderNotFound(pay_order_no.to_string()))?;

        if order.status != PayOrderStatus::Init {
            return Ok(order);
        }

        match self.orders.transition(&order, &PayOrderEvent::Begin, now).await {
            Ok(pending) => Ok(pending),
            // Someone else began or decided it; the current row is the answer
            Err(e) if e.is_conflict() => self
                .orders
                .store()
                .find_by_pay_order_no(pay_order_no)
                .await?
                .ok_or_else(|| crate::error::PayflowError::PayOrderNotFound(pay_order_no.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, request, response), fields(request_id = request.id, pay_order_no = %request.pay_order_no))]
    pub async fn apply_success(
        &self,
        request: &ChannelRequest,
        response: &ChannelResponse,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome> {
        let event = ChannelRequestEvent::Succeed {
            response: response.body.clone(),
            trace_no: response.trace_no.clone(),
            callback_params: response.callback_params.clone(),
        };
        let done = self.requests.transition(request, &event, now).await?;

        if done.request_type.is_payment() {
            let event = PayOrderEvent::Succeed {
                trace_no: response.trace_no.clone(),
            };
            let settled = match self.settle_order(&done, &event, now).await {
                Ok(order) if response.reversal => self
                    .record_bounce(&order.pay_order_no, response.trace_no.clone(), now)
                    .await
                    .map(|_| ()),
                other => other.map(|_| ()),
            };
            settled.map_err(|e| settlement_failed(&done, e))?;
        }

        Ok(RequestOutcome::Succeeded)
    }

    #[instrument(skip(self, request, classification), fields(request_id = request.id, pay_order_no = %request.pay_order_no))]
    pub async fn apply_failure(
        &self,
        request: &ChannelRequest,
        classification: &ErrorClassification,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome> {
        let error = &classification.error;

        match classification.decision {
            RetryDecision::Retry { delay } => {
                let event = ChannelRequestEvent::Fail {
                    exception: error.to_string(),
                    next_execution: now + to_chrono_duration(delay),
                };
                let failed = self.requests.transition(request, &event, now).await?;
                info!(
                    retry_count = failed.retry_count,
                    next_execution = %failed.gmt_next_execution,
                    error = %error,
                    "Request failed, retry scheduled"
                );
                Ok(RequestOutcome::Retrying {
                    retry_count: failed.retry_count,
                    next_execution: failed.gmt_next_execution,
                })
            }
            RetryDecision::Close { reason } => {
                let closed = self
                    .close_request(request, reason, Some(error.to_string()), now)
                    .await?;

                if closed.request_type.is_payment() {
                    let event = PayOrderEvent::Fail {
                        error_code: error.code.name().to_string(),
                        error_msg: error.message.clone(),
                    };
                    self.settle_order(&closed, &event, now)
                        .await
                        .map_err(|e| settlement_failed(&closed, e))?;
                }

                Ok(RequestOutcome::Closed {
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Take a request out of the retry loop without touching its order
    pub async fn close_request(
        &self,
        request: &ChannelRequest,
        reason: &str,
        exception: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ChannelRequest> {
        let event = ChannelRequestEvent::Close {
            reason: reason.to_string(),
            exception,
        };
        let closed = self.requests.transition(request, &event, now).await?;
        info!(
            request_id = closed.id,
            close_reason = %reason,
            retry_count = closed.retry_count,
            "Request closed"
        );
        Ok(closed)
    }

    /// SUCCESS → BOUNCED, then tell upstream about the reversal
    pub async fn record_bounce(
        &self,
        pay_order_no: &str,
        dishonor_trace_no: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let order = self
            .orders
            .transition_latest(pay_order_no, &PayOrderEvent::Bounce { dishonor_trace_no }, now)
            .await?;
        self.notify(&order, RequestType::BouncedNotification, now).await?;
        Ok(order)
    }

    /// Bring an order still INIT or PENDING in line with its decided payment request.
    ///
    /// Repairs an order whose write failed after the request row was committed.
    /// An order that is already final only gets its missing notifications
    /// queued; an undecided payment request leaves everything untouched.
    #[instrument(skip(self))]
    pub async fn reconcile_order(&self, pay_order_no: &str, now: DateTime<Utc>) -> Result<PayOrder> {
        let order = self
            .orders
            .store()
            .find_by_pay_order_no(pay_order_no)
            .await?
            .ok_or_else(|| PayflowError::PayOrderNotFound(pay_order_no.to_string()))?;

        let payment = self
            .requests
            .store()
            .find_by_biz_key(&order.biz_identify_no, &order.biz_unique_no, RequestType::Payment)
            .await?;
        let Some(payment) = payment.filter(|p| p.status.is_terminal()) else {
            return Ok(order);
        };

        if order.status.is_final_status() {
            if order.status != PayOrderStatus::Closed {
                self.notify(&order, RequestType::BasicNotification, now).await?;
            }
            if order.status.is_bounced() {
                self.notify(&order, RequestType::BouncedNotification, now).await?;
            }
            return Ok(order);
        }

        let event = order_event_for(&payment);
        info!(
            request_id = payment.id,
            request_status = %payment.status,
            order_status = %order.status,
            "Reconciling pay order with its payment request"
        );
        self.settle_order(&payment, &event, now).await
    }

    /// Order transition that follows a decided payment request, plus its notification
    async fn settle_order(
        &self,
        payment: &ChannelRequest,
        event: &PayOrderEvent,
        now: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let order = self
            .orders
            .transition_latest(&payment.pay_order_no, event, now)
            .await?;
        if order.status != PayOrderStatus::Closed {
            self.notify(&order, RequestType::BasicNotification, now).await?;
        }
        Ok(order)
    }

    /// Queue a notification of the order's current outcome, if it has a notify URI
    async fn notify(
        &self,
        order: &PayOrder,
        request_type: RequestType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(notify_uri) = order.notify_uri.as_deref().filter(|uri| !uri.is_empty()) else {
            debug!(pay_order_no = %order.pay_order_no, "No notify URI, skipping notification");
            return Ok(());
        };

        let new_request = NewChannelRequest {
            pay_order_no: order.pay_order_no.clone(),
            biz_identify_no: order.biz_identify_no.clone(),
            biz_unique_no: order.biz_unique_no.clone(),
            request_type,
            request_addr: notify_uri.to_string(),
            request_params: order.notification_payload(),
            env: order.env.clone(),
        };
        self.guard
            .ensure_channel_request(new_request.into_channel_request(now))
            .await?;
        Ok(())
    }
}

/// Order event implied by a terminal payment request.
///
/// The channel error code of a closed request is not kept on the row, so a
/// reconciled failure carries the close reason as its error code.
fn order_event_for(payment: &ChannelRequest) -> PayOrderEvent {
    let exception = payment.request_exception.clone().unwrap_or_default();
    match (payment.status, payment.close_reason.as_deref()) {
        (ChannelRequestStatus::Success, _) => PayOrderEvent::Succeed {
            trace_no: payment.channel_trace_no.clone(),
        },
        (_, Some(close_reasons::ORDER_CLOSED)) => PayOrderEvent::Close { reason: exception },
        (_, reason) => PayOrderEvent::Fail {
            error_code: reason.unwrap_or(close_reasons::NOT_RETRYABLE_REQUEST).to_string(),
            error_msg: exception,
        },
    }
}

fn settlement_failed(request: &ChannelRequest, cause: PayflowError) -> PayflowError {
    error!(
        request_id = request.id,
        pay_order_no = %request.pay_order_no,
        request_status = %request.status,
        error = %cause,
        "Request committed but pay order update failed"
    );
    PayflowError::OrderSettlementFailed {
        pay_order_no: request.pay_order_no.clone(),
        request_id: request.id,
        reason: cause.to_string(),
    }
}
