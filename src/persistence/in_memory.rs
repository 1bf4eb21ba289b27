use super::{ChannelRequestStore, PayOrderStore, PersistenceError, PersistenceResult};
use crate::models::{ChannelRequest, PayOrder, RequestType};
use crate::state_machine::{ChannelRequestStatus, PayOrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A thread-safe in-memory store for pay orders.
///
/// Each conditional update runs under the shard write lock of its key, which
/// gives the same compare-and-set guarantee as a conditional SQL `UPDATE`.
#[derive(Default, Clone)]
pub struct InMemoryPayOrderStore {
    orders: Arc<DashMap<String, PayOrder>>,
    biz_index: Arc<DashMap<(String, String), String>>,
}

impl InMemoryPayOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl PayOrderStore for InMemoryPayOrderStore {
    async fn insert(&self, order: &PayOrder) -> PersistenceResult<()> {
        let biz_key = (order.biz_identify_no.clone(), order.biz_unique_no.clone());
        match self.biz_index.entry(biz_key) {
            Entry::Occupied(_) => Err(PersistenceError::DuplicateKey {
                entity: "pay_order",
                key: format!("{}/{}", order.biz_identify_no, order.biz_unique_no),
            }),
            Entry::Vacant(slot) => match self.orders.entry(order.pay_order_no.clone()) {
                Entry::Occupied(_) => Err(PersistenceError::DuplicateKey {
                    entity: "pay_order",
                    key: order.pay_order_no.clone(),
                }),
                Entry::Vacant(row) => {
                    row.insert(order.clone());
                    slot.insert(order.pay_order_no.clone());
                    Ok(())
                }
            },
        }
    }

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Option<PayOrder>> {
        Ok(self.orders.get(pay_order_no).map(|o| o.clone()))
    }

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
    ) -> PersistenceResult<Option<PayOrder>> {
        let key = (biz_identify_no.to_string(), biz_unique_no.to_string());
        let Some(pay_order_no) = self.biz_index.get(&key).map(|v| v.clone()) else {
            return Ok(None);
        };
        self.find_by_pay_order_no(&pay_order_no).await
    }

    async fn compare_and_update(
        &self,
        order: &PayOrder,
        expected_status: PayOrderStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let Some(mut stored) = self.orders.get_mut(&order.pay_order_no) else {
            return Err(PersistenceError::NotFound {
                entity: "pay_order",
                key: order.pay_order_no.clone(),
            });
        };

        if stored.status != expected_status || stored.version != expected_version {
            return Ok(false);
        }

        let mut next = order.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(true)
    }
}

/// A thread-safe in-memory store for channel requests.
#[derive(Default, Clone)]
pub struct InMemoryChannelRequestStore {
    requests: Arc<DashMap<i64, ChannelRequest>>,
    biz_index: Arc<DashMap<(String, String, RequestType), i64>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryChannelRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl ChannelRequestStore for InMemoryChannelRequestStore {
    async fn insert(&self, request: &ChannelRequest) -> PersistenceResult<ChannelRequest> {
        let key = (
            request.biz_identify_no.clone(),
            request.biz_unique_no.clone(),
            request.request_type,
        );
        match self.biz_index.entry(key) {
            Entry::Occupied(_) => Err(PersistenceError::DuplicateKey {
                entity: "channel_request",
                key: format!(
                    "{}/{}/{}",
                    request.biz_identify_no, request.biz_unique_no, request.request_type
                ),
            }),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let mut stored = request.clone();
                stored.id = id;
                self.requests.insert(id, stored.clone());
                slot.insert(id);
                Ok(stored)
            }
        }
    }

    async fn find_by_id(&self, id: i64) -> PersistenceResult<Option<ChannelRequest>> {
        Ok(self.requests.get(&id).map(|r| r.clone()))
    }

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
        request_type: RequestType,
    ) -> PersistenceResult<Option<ChannelRequest>> {
        let key = (
            biz_identify_no.to_string(),
            biz_unique_no.to_string(),
            request_type,
        );
        let Some(id) = self.biz_index.get(&key).map(|v| *v) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Vec<ChannelRequest>> {
        let mut rows: Vec<ChannelRequest> = self
            .requests
            .iter()
            .filter(|r| r.pay_order_no == pay_order_no)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| (r.request_type.code(), r.id));
        Ok(rows)
    }

    async fn find_due(
        &self,
        env: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> PersistenceResult<Vec<ChannelRequest>> {
        let mut due: Vec<ChannelRequest> = self
            .requests
            .iter()
            .filter(|r| r.env == env && r.is_due(now))
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| (r.request_type.code(), r.gmt_next_execution, r.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn compare_and_update(
        &self,
        request: &ChannelRequest,
        expected_status: ChannelRequestStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let Some(mut stored) = self.requests.get_mut(&request.id) else {
            return Err(PersistenceError::NotFound {
                entity: "channel_request",
                key: request.id.to_string(),
            });
        };

        if stored.status != expected_status || stored.version != expected_version {
            return Ok(false);
        }

        let mut next = request.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(true)
    }
}
