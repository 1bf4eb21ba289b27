//! # Payment Service
//!
//! Entry points for upstream systems and channels: accept a payment, close an
//! order, deliver an asynchronous channel callback, record a reversal.
//!
//! ```rust
//! use payflow_core::models::{AccountingEntry, NewPayOrder};
//! use payflow_core::orchestration::PaymentService;
//! use payflow_core::persistence::{InMemoryChannelRequestStore, InMemoryPayOrderStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = PaymentService::new(
//!     Arc::new(InMemoryPayOrderStore::new()),
//!     Arc::new(InMemoryChannelRequestStore::new()),
//! );
//!
//! let accepted = service
//!     .accept_payment(NewPayOrder {
//!         sys_code: "mall".to_string(),
//!         biz_identify_no: "mall-order".to_string(),
//!         biz_unique_no: "A-1".to_string(),
//!         money: 1999,
//!         accounting_entry: AccountingEntry::Debit,
//!         request_addr: "card://visa".to_string(),
//!         request_params: serde_json::json!({"token": "tok_1"}),
//!         notify_uri: None,
//!         extend_info: None,
//!         biz_info: None,
//!         env: "development".to_string(),
//!     })
//!     .await?;
//! assert!(accepted.created);
//! # Ok(())
//! # }
//! ```

use super::error_classifier::{
    ClassifiedError, ErrorClassifier, ErrorCode, ErrorContext, StandardErrorClassifier,
};
use super::idempotency::{CallbackAdmission, IdempotencyGuard};
use super::outcome_processor::{RequestOutcome, RequestOutcomeProcessor};
use crate::channel::{ChannelResponse, DispatchError};
use crate::constants::close_reasons;
use crate::error::{PayflowError, Result};
use crate::models::{
    generate_pay_order_no, ChannelRequest, NewChannelRequest, NewPayOrder, PayOrder, RequestType,
};
use crate::persistence::{ChannelRequestStoreRef, PayOrderStoreRef};
use crate::state_machine::{ChannelRequestStatus, PayOrderEvent, PayOrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outcome of `accept_payment`
#[derive(Debug, Clone)]
pub struct AcceptedPayment {
    pub order: PayOrder,
    /// False when the submission repeated an earlier one
    pub created: bool,
}

/// Asynchronous notification from a channel about one of our requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCallback {
    pub biz_identify_no: String,
    pub biz_unique_no: String,
    pub request_type: RequestType,
    pub result: CallbackResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackResult {
    Success {
        trace_no: Option<String>,
        params: Option<Value>,
    },
    /// Carries the channel's own classification of the failure
    Failure { error: ClassifiedError },
    /// An earlier successful payment was reversed
    Reversal { dishonor_trace_no: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Already decided; nothing was changed
    Discarded,
    Applied(RequestOutcome),
    /// Lost to a concurrent writer; the winner's result stands
    Conflict,
}

#[derive(Clone)]
pub struct PaymentService {
    orders: PayOrderStoreRef,
    requests: ChannelRequestStoreRef,
    guard: IdempotencyGuard,
    processor: RequestOutcomeProcessor,
    classifier: Arc<dyn ErrorClassifier>,
}

impl PaymentService {
    pub fn new(orders: PayOrderStoreRef, requests: ChannelRequestStoreRef) -> Self {
        Self::with_classifier(orders, requests, Arc::new(StandardErrorClassifier::new()))
    }

    /// Use the same classifier as the scheduler so callback failures back off identically
    pub fn with_classifier(
        orders: PayOrderStoreRef,
        requests: ChannelRequestStoreRef,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(orders.clone(), requests.clone()),
            processor: RequestOutcomeProcessor::new(orders.clone(), requests.clone()),
            orders,
            requests,
            classifier,
        }
    }

    pub async fn find_order(&self, pay_order_no: &str) -> Result<PayOrder> {
        self.orders
            .find_by_pay_order_no(pay_order_no)
            .await?
            .ok_or_else(|| PayflowError::PayOrderNotFound(pay_order_no.to_string()))
    }

    pub async fn find_requests(&self, pay_order_no: &str) -> Result<Vec<ChannelRequest>> {
        Ok(self.requests.find_by_pay_order_no(pay_order_no).await?)
    }

    pub async fn accept_payment(&self, new_order: NewPayOrder) -> Result<AcceptedPayment> {
        self.accept_payment_at(new_order, Utc::now()).await
    }

    /// Create the INIT order and its payment request.
    ///
    /// Resubmitting the same `(biz_identify_no, biz_unique_no)` returns the
    /// original order without creating anything.
    #[instrument(skip(self, new_order), fields(biz_identify_no = %new_order.biz_identify_no, biz_unique_no = %new_order.biz_unique_no))]
    pub async fn accept_payment_at(
        &self,
        new_order: NewPayOrder,
        now: DateTime<Utc>,
    ) -> Result<AcceptedPayment> {
        new_order.validate().map_err(PayflowError::InvalidParameter)?;

        let admission = self
            .guard
            .create_pay_order(new_order.into_pay_order(generate_pay_order_no(), now))
            .await?;
        let order = admission.order;

        // A fresh order, or a resubmission of one whose payment request never got written.
        // An existing payment row, decided or not, means there is nothing to create.
        let needs_payment = admission.created
            || (order.status == PayOrderStatus::Init
                && self
                    .requests
                    .find_by_biz_key(
                        &order.biz_identify_no,
                        &order.biz_unique_no,
                        RequestType::Payment,
                    )
                    .await?
                    .is_none());
        if needs_payment {
            let payment = NewChannelRequest {
                pay_order_no: order.pay_order_no.clone(),
                biz_identify_no: order.biz_identify_no.clone(),
                biz_unique_no: order.biz_unique_no.clone(),
                request_type: RequestType::Payment,
                request_addr: new_order.request_addr.clone(),
                request_params: new_order.request_params.clone(),
                env: order.env.clone(),
            };
            self.guard
                .ensure_channel_request(payment.into_channel_request(now))
                .await?;
        }

        if admission.created {
            info!(
                pay_order_no = %order.pay_order_no,
                money = order.money,
                "{}",
                crate::constants::events::ORDER_ACCEPTED
            );
        }

        Ok(AcceptedPayment {
            order,
            created: admission.created,
        })
    }

    pub async fn close_order(&self, pay_order_no: &str, reason: &str) -> Result<PayOrder> {
        self.close_order_at(pay_order_no, reason, Utc::now()).await
    }

    /// Operator cancellation: CLOSED from any non-final status, permanently.
    ///
    /// The payment request is closed first. A payment leg currently leased by a
    /// worker cannot be closed; the caller retries after the attempt resolves.
    #[instrument(skip(self))]
    pub async fn close_order_at(
        &self,
        pay_order_no: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let order = self.find_order(pay_order_no).await?;
        if order.status.is_final_status() {
            return Err(PayflowError::Classified(ClassifiedError::new(
                ErrorCode::InvalidStatus,
                format!("pay order {pay_order_no} is already {}", order.status),
            )));
        }

        let payment = self
            .requests
            .find_by_biz_key(&order.biz_identify_no, &order.biz_unique_no, RequestType::Payment)
            .await?;

        if let Some(payment) = payment.filter(|r| !r.status.is_terminal()) {
            if payment.status == ChannelRequestStatus::Pending && payment.gmt_next_execution > now {
                return Err(PayflowError::Classified(ClassifiedError::new(
                    ErrorCode::InvalidStatus,
                    format!("payment leg of {pay_order_no} is in flight"),
                )));
            }
            self.processor
                .close_request(
                    &payment,
                    close_reasons::ORDER_CLOSED,
                    Some(reason.to_string()),
                    now,
                )
                .await?;
        }

        let closed = self
            .processor
            .order_machine()
            .transition_latest(
                pay_order_no,
                &PayOrderEvent::Close {
                    reason: reason.to_string(),
                },
                now,
            )
            .await?;
        Ok(closed)
    }

    pub async fn handle_callback(&self, callback: ChannelCallback) -> Result<CallbackOutcome> {
        self.handle_callback_at(callback, Utc::now()).await
    }

    /// Apply a channel callback exactly like a polled dispatch outcome.
    ///
    /// A callback for a request that is already SUCCESS or CLOSED is discarded
    /// without touching any row.
    #[instrument(skip(self, callback), fields(biz_identify_no = %callback.biz_identify_no, biz_unique_no = %callback.biz_unique_no, request_type = %callback.request_type))]
    pub async fn handle_callback_at(
        &self,
        callback: ChannelCallback,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        let ChannelCallback {
            biz_identify_no,
            biz_unique_no,
            request_type,
            result,
        } = callback;

        let reported = match result {
            CallbackResult::Success { trace_no, params } => Ok(ChannelResponse {
                trace_no,
                callback_params: params,
                ..Default::default()
            }),
            CallbackResult::Failure { error } => Err(error),
            CallbackResult::Reversal { dishonor_trace_no } => {
                return self
                    .handle_reversal(&biz_identify_no, &biz_unique_no, dishonor_trace_no, now)
                    .await;
            }
        };

        let request = match self
            .guard
            .admit_callback(&biz_identify_no, &biz_unique_no, request_type)
            .await?
        {
            CallbackAdmission::Discard { .. } => return Ok(CallbackOutcome::Discarded),
            CallbackAdmission::Apply(request) => request,
        };

        let applied = match reported {
            Ok(response) => self.processor.apply_success(&request, &response, now).await,
            Err(error) => {
                let context = ErrorContext {
                    request_id: request.id,
                    pay_order_no: request.pay_order_no.clone(),
                    request_type: request.request_type,
                    retry_count: request.retry_count,
                    execution_duration: Duration::ZERO,
                };
                let classification = self
                    .classifier
                    .classify(&DispatchError::Classified(error), &context);
                self.processor
                    .apply_failure(&request, &classification, now)
                    .await
            }
        };

        match applied {
            Ok(outcome) => Ok(CallbackOutcome::Applied(outcome)),
            Err(PayflowError::StateMachine(e)) if e.is_conflict() => {
                warn!(request_id = request.id, "Callback lost to a concurrent update");
                Ok(CallbackOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_reversal(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
        dishonor_trace_no: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome> {
        let order = self
            .orders
            .find_by_biz_key(biz_identify_no, biz_unique_no)
            .await?
            .ok_or_else(|| {
                PayflowError::PayOrderNotFound(format!("{biz_identify_no}/{biz_unique_no}"))
            })?;

        if order.status.is_bounced() {
            info!(pay_order_no = %order.pay_order_no, "Reversal already recorded, discarding");
            return Ok(CallbackOutcome::Discarded);
        }

        self.record_bounce_at(&order.pay_order_no, dishonor_trace_no, now)
            .await?;
        Ok(CallbackOutcome::Applied(RequestOutcome::Succeeded))
    }

    pub async fn record_bounce(
        &self,
        pay_order_no: &str,
        dishonor_trace_no: Option<String>,
    ) -> Result<PayOrder> {
        self.record_bounce_at(pay_order_no, dishonor_trace_no, Utc::now())
            .await
    }

    /// SUCCESS → BOUNCED; any other current status is an illegal transition
    #[instrument(skip(self))]
    pub async fn record_bounce_at(
        &self,
        pay_order_no: &str,
        dishonor_trace_no: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PayOrder> {
        self.processor
            .record_bounce(pay_order_no, dishonor_trace_no, now)
            .await
    }

    pub async fn reconcile_order(&self, pay_order_no: &str) -> Result<PayOrder> {
        self.reconcile_order_at(pay_order_no, Utc::now()).await
    }

    /// Repair an order left behind its decided payment request
    pub async fn reconcile_order_at(&self, pay_order_no: &str, now: DateTime<Utc>) -> Result<PayOrder> {
        self.processor.reconcile_order(pay_order_no, now).await
    }
}
