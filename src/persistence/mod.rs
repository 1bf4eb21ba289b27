//! # Persistence
//!
//! Storage ports for [`PayOrder`] and [`ChannelRequest`] rows.
//!
//! The stores offer point lookups by primary and business key plus a single atomic
//! conditional write, [`compare_and_update`](ChannelRequestStore::compare_and_update).
//! Status fields are never written unconditionally: every mutation names the status
//! and version it expects to replace, and a mismatch reports `false` instead of
//! overwriting. This conditional write is the only coordination point between
//! concurrently running schedulers, which may live on different hosts.
//!
//! Implementations:
//! - [`postgres`] - sqlx/PostgreSQL, schema in `migrations/`
//! - [`in_memory`] - dashmap-backed, for tests and single-process embedding

pub mod in_memory;
pub mod postgres;

use crate::models::{ChannelRequest, PayOrder, RequestType};
use crate::state_machine::{ChannelRequestStatus, PayOrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

pub use in_memory::{InMemoryChannelRequestStore, InMemoryPayOrderStore};
pub use postgres::{PgChannelRequestStore, PgPayOrderStore};

/// Error type for storage operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Duplicate {entity} for key {key}")]
    DuplicateKey { entity: &'static str, key: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A persisted row that cannot be mapped back to the model
    #[error("Corrupt {entity} row: {reason}")]
    CorruptRow { entity: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[async_trait]
pub trait PayOrderStore: Send + Sync {
    /// Insert a new order; `DuplicateKey` if the pay order number or the
    /// `(biz_identify_no, biz_unique_no)` pair already exists
    async fn insert(&self, order: &PayOrder) -> PersistenceResult<()>;

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Option<PayOrder>>;

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
    ) -> PersistenceResult<Option<PayOrder>>;

    /// Replace the stored row with `order` only if it still has `expected_status`
    /// and `expected_version`. The written row gets `expected_version + 1`.
    async fn compare_and_update(
        &self,
        order: &PayOrder,
        expected_status: PayOrderStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool>;
}

#[async_trait]
pub trait ChannelRequestStore: Send + Sync {
    /// Insert a new request and return it with its assigned id; `DuplicateKey` if
    /// `(biz_identify_no, biz_unique_no, request_type)` already exists
    async fn insert(&self, request: &ChannelRequest) -> PersistenceResult<ChannelRequest>;

    async fn find_by_id(&self, id: i64) -> PersistenceResult<Option<ChannelRequest>>;

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
        request_type: RequestType,
    ) -> PersistenceResult<Option<ChannelRequest>>;

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Vec<ChannelRequest>>;

    /// Rows of `env` with a schedulable status and `gmt_next_execution <= now`,
    /// ordered by request type code, then due time
    async fn find_due(
        &self,
        env: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> PersistenceResult<Vec<ChannelRequest>>;

    /// Conditional write keyed on `(id, expected_status, expected_version)`.
    /// The written row gets `expected_version + 1`.
    async fn compare_and_update(
        &self,
        request: &ChannelRequest,
        expected_status: ChannelRequestStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool>;
}

pub type PayOrderStoreRef = Arc<dyn PayOrderStore>;
pub type ChannelRequestStoreRef = Arc<dyn ChannelRequestStore>;
