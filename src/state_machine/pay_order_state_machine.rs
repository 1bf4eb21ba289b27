use super::{
    errors::{invalid_transition, StateMachineError, StateMachineResult},
    events::PayOrderEvent,
    states::PayOrderStatus,
};
use crate::constants::system::ORDER_UPDATE_MAX_ATTEMPTS;
use crate::logging::log_order_transition;
use crate::models::PayOrder;
use crate::persistence::PayOrderStoreRef;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Validates and applies pay order status transitions.
///
/// The transition table is a pure precondition check; `transition` pairs it with
/// a conditional write on `(status, version)` so a stale caller can never
/// overwrite a newer status.
#[derive(Clone)]
pub struct PayOrderStateMachine {
    store: PayOrderStoreRef,
}

impl PayOrderStateMachine {
    pub fn new(store: PayOrderStoreRef) -> Self {
        Self { store }
    }

    /// Precondition check over raw persisted status codes
    pub fn validate_status_before_update(old: &str, new: &str) -> StateMachineResult<()> {
        let old_status = PayOrderStatus::from_code(old)
            .ok_or_else(|| StateMachineError::InvalidStatus(old.to_string()))?;
        let new_status = PayOrderStatus::from_code(new)
            .ok_or_else(|| StateMachineError::InvalidStatus(new.to_string()))?;
        Self::validate_transition(old_status, new_status)
    }

    pub fn validate_transition(old: PayOrderStatus, new: PayOrderStatus) -> StateMachineResult<()> {
        let allowed = match new {
            PayOrderStatus::Init => old == PayOrderStatus::Init,
            PayOrderStatus::Pending => !old.is_final_status(),
            // Only way out of a final status: funds moved, then reversed
            PayOrderStatus::Bounced => old == PayOrderStatus::Success,
            PayOrderStatus::Success | PayOrderStatus::Failed | PayOrderStatus::Closed => {
                !old.is_final_status()
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(invalid_transition(old, new))
        }
    }

    /// Compute the next row for `event` without touching storage
    pub fn apply_event(
        order: &PayOrder,
        event: &PayOrderEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<PayOrder> {
        let target = event.target_status();
        Self::validate_transition(order.status, target)?;

        let mut next = order.clone();
        next.status = target;
        next.version = order.version + 1;

        match event {
            PayOrderEvent::Begin => {
                next.timestamps.gmt_payment_begin.get_or_insert(now);
            }
            PayOrderEvent::Succeed { trace_no } => {
                next.timestamps.gmt_payment_success = Some(now);
                next.channel_payment_trace_no = trace_no.clone();
            }
            PayOrderEvent::Fail {
                error_code,
                error_msg,
            } => {
                next.timestamps.gmt_payment_failure = Some(now);
                next.channel_error_code = Some(error_code.clone());
                next.channel_error_msg = Some(error_msg.clone());
            }
            PayOrderEvent::Close { .. } => {
                next.timestamps.gmt_payment_closed = Some(now);
            }
            PayOrderEvent::Bounce { dishonor_trace_no } => {
                next.timestamps.gmt_payment_bounced = Some(now);
                next.channel_dishonor_trace_no = dishonor_trace_no.clone();
            }
        }

        Ok(next)
    }

    /// Apply `event` to the observed `order` with a single conditional write
    pub async fn transition(
        &self,
        order: &PayOrder,
        event: &PayOrderEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<PayOrder> {
        let next = Self::apply_event(order, event, now)?;

        let applied = self
            .store
            .compare_and_update(&next, order.status, order.version)
            .await?;
        if !applied {
            return Err(StateMachineError::ConcurrentModification {
                entity: "pay_order",
                entity_id: order.pay_order_no.clone(),
            });
        }

        log_order_transition(
            &order.pay_order_no,
            order.status,
            next.status,
            event.event_type(),
        );
        Ok(next)
    }

    /// Re-read the order and apply `event`, retrying a bounded number of times
    /// when another writer bumped the version in between. Illegal transitions
    /// are returned immediately.
    pub async fn transition_latest(
        &self,
        pay_order_no: &str,
        event: &PayOrderEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<PayOrder> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let order = self
                .store
                .find_by_pay_order_no(pay_order_no)
                .await?
                .ok_or_else(|| {
                    StateMachineError::Persistence(crate::persistence::PersistenceError::NotFound {
                        entity: "pay_order",
                        key: pay_order_no.to_string(),
                    })
                })?;

            match self.transition(&order, event, now).await {
                Err(e) if e.is_conflict() && attempt < ORDER_UPDATE_MAX_ATTEMPTS => {
                    warn!(
                        pay_order_no = %pay_order_no,
                        attempt,
                        "Pay order changed concurrently, re-reading"
                    );
                }
                other => return other,
            }
            debug!(pay_order_no = %pay_order_no, attempt, "Retrying pay order transition");
        }
    }

    pub fn store(&self) -> &PayOrderStoreRef {
        &self.store
    }
}
