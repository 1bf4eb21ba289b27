use super::{
    errors::{invalid_transition, StateMachineError, StateMachineResult},
    events::ChannelRequestEvent,
    states::ChannelRequestStatus,
};
use crate::logging::log_request_transition;
use crate::models::ChannelRequest;
use crate::persistence::ChannelRequestStoreRef;
use chrono::{DateTime, Utc};

/// Validates and applies channel request status transitions.
///
/// Every write is conditional on the `(status, version)` the caller observed,
/// so exactly one of several racing writers wins and the others see
/// `ConcurrentModification`.
#[derive(Clone)]
pub struct ChannelRequestStateMachine {
    store: ChannelRequestStoreRef,
}

impl ChannelRequestStateMachine {
    pub fn new(store: ChannelRequestStoreRef) -> Self {
        Self { store }
    }

    /// Precondition check over raw persisted status codes
    pub fn validate_status_before_update(old: &str, new: &str) -> StateMachineResult<()> {
        let old_status = ChannelRequestStatus::from_code(old)
            .ok_or_else(|| StateMachineError::InvalidStatus(old.to_string()))?;
        let new_status = ChannelRequestStatus::from_code(new)
            .ok_or_else(|| StateMachineError::InvalidStatus(new.to_string()))?;
        Self::validate_transition(old_status, new_status)
    }

    pub fn validate_transition(
        old: ChannelRequestStatus,
        new: ChannelRequestStatus,
    ) -> StateMachineResult<()> {
        let allowed = match new {
            ChannelRequestStatus::Init => old == ChannelRequestStatus::Init,
            ChannelRequestStatus::Pending | ChannelRequestStatus::Failed => !old.is_terminal(),
            ChannelRequestStatus::Success | ChannelRequestStatus::Closed => !old.is_terminal(),
        };

        if allowed {
            Ok(())
        } else {
            Err(invalid_transition(old, new))
        }
    }

    /// Compute the next row for `event` without touching storage
    pub fn apply_event(
        request: &ChannelRequest,
        event: &ChannelRequestEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<ChannelRequest> {
        let target = event.target_status();
        Self::validate_transition(request.status, target)?;

        let mut next = request.clone();
        next.status = target;
        next.version = request.version + 1;

        match event {
            ChannelRequestEvent::Claim { lease_until } => {
                next.gmt_next_execution = *lease_until;
            }
            ChannelRequestEvent::Succeed {
                response,
                trace_no,
                callback_params,
            } => {
                next.gmt_last_execution = Some(now);
                if response.is_some() {
                    next.request_response = response.clone();
                }
                if trace_no.is_some() {
                    next.channel_trace_no = trace_no.clone();
                }
                if callback_params.is_some() {
                    next.callback_params = callback_params.clone();
                }
            }
            ChannelRequestEvent::Fail {
                exception,
                next_execution,
            } => {
                next.retry_count = request.retry_count + 1;
                next.gmt_next_execution = *next_execution;
                next.gmt_last_execution = Some(now);
                next.request_exception = Some(exception.clone());
            }
            ChannelRequestEvent::Close { reason, exception } => {
                next.gmt_last_execution = Some(now);
                next.close_reason = Some(reason.clone());
                if exception.is_some() {
                    next.request_exception = exception.clone();
                }
            }
        }

        Ok(next)
    }

    /// Apply `event` to the observed `request` with a single conditional write
    pub async fn transition(
        &self,
        request: &ChannelRequest,
        event: &ChannelRequestEvent,
        now: DateTime<Utc>,
    ) -> StateMachineResult<ChannelRequest> {
        let next = Self::apply_event(request, event, now)?;

        let applied = self
            .store
            .compare_and_update(&next, request.status, request.version)
            .await?;
        if !applied {
            return Err(StateMachineError::ConcurrentModification {
                entity: "channel_request",
                entity_id: request.id.to_string(),
            });
        }

        log_request_transition(
            request.id,
            &request.pay_order_no,
            request.request_type,
            request.status,
            next.status,
            event.event_type(),
        );
        Ok(next)
    }

    pub fn store(&self) -> &ChannelRequestStoreRef {
        &self.store
    }
}
