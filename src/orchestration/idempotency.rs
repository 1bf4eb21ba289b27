//! # Idempotency Guard
//!
//! Duplicate suppression at the three places a retry or replay can enter the
//! pipeline: order creation, channel request creation, and inbound callbacks.
//!
//! The business-key unique constraints in the stores are the backstop; the
//! guard turns a collision into "return what already exists" instead of an
//! error, so an upstream caller that resubmits sees its original result again.

use crate::error::{PayflowError, Result};
use crate::models::{ChannelRequest, PayOrder, RequestType};
use crate::persistence::{ChannelRequestStoreRef, PayOrderStoreRef, PersistenceError};
use crate::state_machine::ChannelRequestStatus;
use tracing::{debug, info};

/// Result of an order creation attempt
#[derive(Debug, Clone)]
pub struct OrderAdmission {
    pub order: PayOrder,
    /// False when an order with the same business key already existed
    pub created: bool,
}

/// Result of a channel request creation attempt
#[derive(Debug, Clone)]
pub struct RequestAdmission {
    pub request: ChannelRequest,
    pub created: bool,
}

/// Whether an inbound callback may mutate its request
#[derive(Debug, Clone)]
pub enum CallbackAdmission {
    /// The request is already decided; drop the callback without side effects
    Discard {
        request_id: i64,
        status: ChannelRequestStatus,
    },
    Apply(ChannelRequest),
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    orders: PayOrderStoreRef,
    requests: ChannelRequestStoreRef,
}

impl IdempotencyGuard {
    pub fn new(orders: PayOrderStoreRef, requests: ChannelRequestStoreRef) -> Self {
        Self { orders, requests }
    }

    /// Insert `order` unless one with the same `(biz_identify_no, biz_unique_no)` exists
    pub async fn create_pay_order(&self, order: PayOrder) -> Result<OrderAdmission> {
        if let Some(existing) = self
            .orders
            .find_by_biz_key(&order.biz_identify_no, &order.biz_unique_no)
            .await?
        {
            info!(
                pay_order_no = %existing.pay_order_no,
                biz_identify_no = %order.biz_identify_no,
                biz_unique_no = %order.biz_unique_no,
                "Duplicate pay order submission, returning existing order"
            );
            return Ok(OrderAdmission {
                order: existing,
                created: false,
            });
        }

        match self.orders.insert(&order).await {
            Ok(()) => Ok(OrderAdmission {
                order,
                created: true,
            }),
            // Lost the race to a concurrent submission of the same key
            Err(PersistenceError::DuplicateKey { .. }) => {
                let existing = self
                    .orders
                    .find_by_biz_key(&order.biz_identify_no, &order.biz_unique_no)
                    .await?
                    .ok_or_else(|| {
                        PayflowError::Internal(format!(
                            "pay order {}/{} reported duplicate but cannot be found",
                            order.biz_identify_no, order.biz_unique_no
                        ))
                    })?;
                Ok(OrderAdmission {
                    order: existing,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert `request` unless its `(biz_identify_no, biz_unique_no, request_type)` exists.
    ///
    /// An existing non-terminal request is reused. An existing terminal payment
    /// request rejects the attempt with `IdempotentRequest`; a terminal
    /// notification is returned as is.
    pub async fn ensure_channel_request(&self, request: ChannelRequest) -> Result<RequestAdmission> {
        let existing = self
            .requests
            .find_by_biz_key(
                &request.biz_identify_no,
                &request.biz_unique_no,
                request.request_type,
            )
            .await?;
        if let Some(existing) = existing {
            return Self::reuse(existing);
        }

        match self.requests.insert(&request).await {
            Ok(stored) => {
                debug!(
                    request_id = stored.id,
                    pay_order_no = %stored.pay_order_no,
                    request_type = %stored.request_type,
                    "{}",
                    crate::constants::events::REQUEST_CREATED
                );
                Ok(RequestAdmission {
                    request: stored,
                    created: true,
                })
            }
            Err(PersistenceError::DuplicateKey { .. }) => {
                let existing = self
                    .requests
                    .find_by_biz_key(
                        &request.biz_identify_no,
                        &request.biz_unique_no,
                        request.request_type,
                    )
                    .await?
                    .ok_or_else(|| {
                        PayflowError::Internal(format!(
                            "{} request {}/{} reported duplicate but cannot be found",
                            request.request_type, request.biz_identify_no, request.biz_unique_no
                        ))
                    })?;
                Self::reuse(existing)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reuse(existing: ChannelRequest) -> Result<RequestAdmission> {
        if existing.status.is_terminal() && existing.request_type == RequestType::Payment {
            return Err(PayflowError::IdempotentRequest {
                biz_identify_no: existing.biz_identify_no,
                biz_unique_no: existing.biz_unique_no,
                request_type: existing.request_type.to_string(),
                status: existing.status.to_string(),
            });
        }

        debug!(
            request_id = existing.id,
            status = %existing.status,
            "Reusing existing channel request"
        );
        Ok(RequestAdmission {
            request: existing,
            created: false,
        })
    }

    /// Decide whether a callback for the given request may be applied
    pub async fn admit_callback(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
        request_type: RequestType,
    ) -> Result<CallbackAdmission> {
        let request = self
            .requests
            .find_by_biz_key(biz_identify_no, biz_unique_no, request_type)
            .await?
            .ok_or_else(|| {
                PayflowError::ChannelRequestNotFound(format!(
                    "{request_type} {biz_identify_no}/{biz_unique_no}"
                ))
            })?;

        if request.status.is_terminal() {
            info!(
                request_id = request.id,
                status = %request.status,
                "{}",
                crate::constants::events::CALLBACK_DISCARDED
            );
            return Ok(CallbackAdmission::Discard {
                request_id: request.id,
                status: request.status,
            });
        }

        Ok(CallbackAdmission::Apply(request))
    }
}
