//! PostgreSQL-backed stores.
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate compiles
//! without a live database. The schema lives in `migrations/0001_payflow_schema.sql`.

use super::{ChannelRequestStore, PayOrderStore, PersistenceError, PersistenceResult};
use crate::models::{AccountingEntry, ChannelRequest, PayOrder, PayOrderTimestamps, RequestType};
use crate::state_machine::{ChannelRequestStatus, PayOrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Open a connection pool from the database section of the configuration
pub async fn connect(config: &crate::config::DatabaseConfig) -> PersistenceResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            PersistenceError::Database(e)
        })?;
    Ok(pool)
}

fn map_insert_error(entity: &'static str, key: String, err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PersistenceError::DuplicateKey { entity, key }
        }
        _ => PersistenceError::Database(err),
    }
}

/// Internal struct for pay order rows
#[derive(FromRow)]
struct PayOrderRow {
    pay_order_no: String,
    sys_code: String,
    biz_identify_no: String,
    biz_unique_no: String,
    money: i64,
    accounting_entry: String,
    status: String,
    version: i64,
    gmt_accepted: Option<DateTime<Utc>>,
    gmt_payment_begin: Option<DateTime<Utc>>,
    gmt_payment_success: Option<DateTime<Utc>>,
    gmt_payment_failure: Option<DateTime<Utc>>,
    gmt_payment_closed: Option<DateTime<Utc>>,
    gmt_payment_bounced: Option<DateTime<Utc>>,
    channel_payment_trace_no: Option<String>,
    channel_dishonor_trace_no: Option<String>,
    channel_error_code: Option<String>,
    channel_error_msg: Option<String>,
    notify_uri: Option<String>,
    extend_info: Option<serde_json::Value>,
    biz_info: Option<serde_json::Value>,
    env: String,
}

impl TryFrom<PayOrderRow> for PayOrder {
    type Error = PersistenceError;

    fn try_from(row: PayOrderRow) -> Result<Self, Self::Error> {
        let status = PayOrderStatus::from_code(&row.status).ok_or_else(|| {
            PersistenceError::CorruptRow {
                entity: "pay_order",
                reason: format!("{}: unknown status {}", row.pay_order_no, row.status),
            }
        })?;
        let accounting_entry = AccountingEntry::from_code(&row.accounting_entry).ok_or_else(|| {
            PersistenceError::CorruptRow {
                entity: "pay_order",
                reason: format!(
                    "{}: unknown accounting entry {}",
                    row.pay_order_no, row.accounting_entry
                ),
            }
        })?;

        Ok(PayOrder {
            pay_order_no: row.pay_order_no,
            sys_code: row.sys_code,
            biz_identify_no: row.biz_identify_no,
            biz_unique_no: row.biz_unique_no,
            money: row.money,
            accounting_entry,
            status,
            version: row.version,
            timestamps: PayOrderTimestamps {
                gmt_accepted: row.gmt_accepted,
                gmt_payment_begin: row.gmt_payment_begin,
                gmt_payment_success: row.gmt_payment_success,
                gmt_payment_failure: row.gmt_payment_failure,
                gmt_payment_closed: row.gmt_payment_closed,
                gmt_payment_bounced: row.gmt_payment_bounced,
            },
            channel_payment_trace_no: row.channel_payment_trace_no,
            channel_dishonor_trace_no: row.channel_dishonor_trace_no,
            channel_error_code: row.channel_error_code,
            channel_error_msg: row.channel_error_msg,
            notify_uri: row.notify_uri,
            extend_info: row.extend_info,
            biz_info: row.biz_info,
            env: row.env,
        })
    }
}

const PAY_ORDER_COLUMNS: &str = r#"
    pay_order_no, sys_code, biz_identify_no, biz_unique_no, money, accounting_entry,
    status, version, gmt_accepted, gmt_payment_begin, gmt_payment_success,
    gmt_payment_failure, gmt_payment_closed, gmt_payment_bounced,
    channel_payment_trace_no, channel_dishonor_trace_no, channel_error_code,
    channel_error_msg, notify_uri, extend_info, biz_info, env
"#;

pub struct PgPayOrderStore {
    pool: PgPool,
}

impl PgPayOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        binds: &[&str],
    ) -> PersistenceResult<Option<PayOrder>> {
        let sql = format!("SELECT {PAY_ORDER_COLUMNS} FROM payflow_pay_orders WHERE {clause}");
        let mut query = sqlx::query_as::<_, PayOrderRow>(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        query
            .fetch_optional(&self.pool)
            .await?
            .map(PayOrder::try_from)
            .transpose()
    }
}

#[async_trait]
impl PayOrderStore for PgPayOrderStore {
    #[instrument(skip(self, order), fields(pay_order_no = %order.pay_order_no))]
    async fn insert(&self, order: &PayOrder) -> PersistenceResult<()> {
        let sql = format!(
            "INSERT INTO payflow_pay_orders ({PAY_ORDER_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)"
        );
        let t = &order.timestamps;
        sqlx::query(&sql)
            .bind(&order.pay_order_no)
            .bind(&order.sys_code)
            .bind(&order.biz_identify_no)
            .bind(&order.biz_unique_no)
            .bind(order.money)
            .bind(order.accounting_entry.code())
            .bind(order.status.code())
            .bind(order.version)
            .bind(t.gmt_accepted)
            .bind(t.gmt_payment_begin)
            .bind(t.gmt_payment_success)
            .bind(t.gmt_payment_failure)
            .bind(t.gmt_payment_closed)
            .bind(t.gmt_payment_bounced)
            .bind(&order.channel_payment_trace_no)
            .bind(&order.channel_dishonor_trace_no)
            .bind(&order.channel_error_code)
            .bind(&order.channel_error_msg)
            .bind(&order.notify_uri)
            .bind(&order.extend_info)
            .bind(&order.biz_info)
            .bind(&order.env)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_insert_error(
                    "pay_order",
                    format!("{}/{}", order.biz_identify_no, order.biz_unique_no),
                    e,
                )
            })?;
        Ok(())
    }

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Option<PayOrder>> {
        self.fetch_one_where("pay_order_no = $1", &[pay_order_no])
            .await
    }

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
    ) -> PersistenceResult<Option<PayOrder>> {
        self.fetch_one_where(
            "biz_identify_no = $1 AND biz_unique_no = $2",
            &[biz_identify_no, biz_unique_no],
        )
        .await
    }

    #[instrument(skip(self, order), fields(pay_order_no = %order.pay_order_no))]
    async fn compare_and_update(
        &self,
        order: &PayOrder,
        expected_status: PayOrderStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let t = &order.timestamps;
        let result = sqlx::query(
            r#"
            UPDATE payflow_pay_orders
            SET status = $1, version = $2 + 1,
                gmt_payment_begin = $3, gmt_payment_success = $4, gmt_payment_failure = $5,
                gmt_payment_closed = $6, gmt_payment_bounced = $7,
                channel_payment_trace_no = $8, channel_dishonor_trace_no = $9,
                channel_error_code = $10, channel_error_msg = $11
            WHERE pay_order_no = $12 AND status = $13 AND version = $2
            "#,
        )
        .bind(order.status.code())
        .bind(expected_version)
        .bind(t.gmt_payment_begin)
        .bind(t.gmt_payment_success)
        .bind(t.gmt_payment_failure)
        .bind(t.gmt_payment_closed)
        .bind(t.gmt_payment_bounced)
        .bind(&order.channel_payment_trace_no)
        .bind(&order.channel_dishonor_trace_no)
        .bind(&order.channel_error_code)
        .bind(&order.channel_error_msg)
        .bind(&order.pay_order_no)
        .bind(expected_status.code())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        debug!(applied, expected_version, "Conditional pay order update");
        Ok(applied)
    }
}

/// Internal struct for channel request rows
#[derive(FromRow)]
struct ChannelRequestRow {
    id: i64,
    pay_order_no: String,
    biz_identify_no: String,
    biz_unique_no: String,
    request_type: i16,
    retry_count: i32,
    request_addr: String,
    status: String,
    version: i64,
    gmt_create: DateTime<Utc>,
    gmt_next_execution: DateTime<Utc>,
    gmt_last_execution: Option<DateTime<Utc>>,
    request_params: serde_json::Value,
    request_response: Option<String>,
    channel_trace_no: Option<String>,
    callback_params: Option<serde_json::Value>,
    request_exception: Option<String>,
    close_reason: Option<String>,
    env: String,
}

impl TryFrom<ChannelRequestRow> for ChannelRequest {
    type Error = PersistenceError;

    fn try_from(row: ChannelRequestRow) -> Result<Self, Self::Error> {
        let status = ChannelRequestStatus::from_code(&row.status).ok_or_else(|| {
            PersistenceError::CorruptRow {
                entity: "channel_request",
                reason: format!("{}: unknown status {}", row.id, row.status),
            }
        })?;
        let request_type = RequestType::from_code(row.request_type).ok_or_else(|| {
            PersistenceError::CorruptRow {
                entity: "channel_request",
                reason: format!("{}: unknown request type {}", row.id, row.request_type),
            }
        })?;

        Ok(ChannelRequest {
            id: row.id,
            pay_order_no: row.pay_order_no,
            biz_identify_no: row.biz_identify_no,
            biz_unique_no: row.biz_unique_no,
            request_type,
            retry_count: row.retry_count,
            request_addr: row.request_addr,
            status,
            version: row.version,
            gmt_create: row.gmt_create,
            gmt_next_execution: row.gmt_next_execution,
            gmt_last_execution: row.gmt_last_execution,
            request_params: row.request_params,
            request_response: row.request_response,
            channel_trace_no: row.channel_trace_no,
            callback_params: row.callback_params,
            request_exception: row.request_exception,
            close_reason: row.close_reason,
            env: row.env,
        })
    }
}

const CHANNEL_REQUEST_COLUMNS: &str = r#"
    id, pay_order_no, biz_identify_no, biz_unique_no, request_type, retry_count,
    request_addr, status, version, gmt_create, gmt_next_execution, gmt_last_execution,
    request_params, request_response, channel_trace_no, callback_params, request_exception,
    close_reason, env
"#;

pub struct PgChannelRequestStore {
    pool: PgPool,
}

impl PgChannelRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn rows_into_requests(rows: Vec<ChannelRequestRow>) -> PersistenceResult<Vec<ChannelRequest>> {
        rows.into_iter().map(ChannelRequest::try_from).collect()
    }
}

#[async_trait]
impl ChannelRequestStore for PgChannelRequestStore {
    #[instrument(skip(self, request), fields(pay_order_no = %request.pay_order_no, request_type = %request.request_type))]
    async fn insert(&self, request: &ChannelRequest) -> PersistenceResult<ChannelRequest> {
        let sql = format!(
            r#"
            INSERT INTO payflow_channel_requests
            (pay_order_no, biz_identify_no, biz_unique_no, request_type, retry_count,
             request_addr, status, version, gmt_create, gmt_next_execution, gmt_last_execution,
             request_params, request_response, channel_trace_no, callback_params, request_exception,
             close_reason, env)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {CHANNEL_REQUEST_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ChannelRequestRow>(&sql)
            .bind(&request.pay_order_no)
            .bind(&request.biz_identify_no)
            .bind(&request.biz_unique_no)
            .bind(request.request_type.code())
            .bind(request.retry_count)
            .bind(&request.request_addr)
            .bind(request.status.code())
            .bind(request.version)
            .bind(request.gmt_create)
            .bind(request.gmt_next_execution)
            .bind(request.gmt_last_execution)
            .bind(&request.request_params)
            .bind(&request.request_response)
            .bind(&request.channel_trace_no)
            .bind(&request.callback_params)
            .bind(&request.request_exception)
            .bind(&request.close_reason)
            .bind(&request.env)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_insert_error(
                    "channel_request",
                    format!(
                        "{}/{}/{}",
                        request.biz_identify_no, request.biz_unique_no, request.request_type
                    ),
                    e,
                )
            })?;
        ChannelRequest::try_from(row)
    }

    async fn find_by_id(&self, id: i64) -> PersistenceResult<Option<ChannelRequest>> {
        let sql = format!("SELECT {CHANNEL_REQUEST_COLUMNS} FROM payflow_channel_requests WHERE id = $1");
        sqlx::query_as::<_, ChannelRequestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ChannelRequest::try_from)
            .transpose()
    }

    async fn find_by_biz_key(
        &self,
        biz_identify_no: &str,
        biz_unique_no: &str,
        request_type: RequestType,
    ) -> PersistenceResult<Option<ChannelRequest>> {
        let sql = format!(
            "SELECT {CHANNEL_REQUEST_COLUMNS} FROM payflow_channel_requests \
             WHERE biz_identify_no = $1 AND biz_unique_no = $2 AND request_type = $3"
        );
        sqlx::query_as::<_, ChannelRequestRow>(&sql)
            .bind(biz_identify_no)
            .bind(biz_unique_no)
            .bind(request_type.code())
            .fetch_optional(&self.pool)
            .await?
            .map(ChannelRequest::try_from)
            .transpose()
    }

    async fn find_by_pay_order_no(&self, pay_order_no: &str) -> PersistenceResult<Vec<ChannelRequest>> {
        let sql = format!(
            "SELECT {CHANNEL_REQUEST_COLUMNS} FROM payflow_channel_requests \
             WHERE pay_order_no = $1 ORDER BY request_type, id"
        );
        let rows = sqlx::query_as::<_, ChannelRequestRow>(&sql)
            .bind(pay_order_no)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_into_requests(rows)
    }

    #[instrument(skip(self))]
    async fn find_due(
        &self,
        env: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> PersistenceResult<Vec<ChannelRequest>> {
        let sql = format!(
            r#"
            SELECT {CHANNEL_REQUEST_COLUMNS}
            FROM payflow_channel_requests
            WHERE env = $1
              AND status IN ('INIT', 'PENDING', 'FAILED')
              AND gmt_next_execution <= $2
            ORDER BY request_type ASC, gmt_next_execution ASC, id ASC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, ChannelRequestRow>(&sql)
            .bind(env)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "Fetched due channel requests");
        Self::rows_into_requests(rows)
    }

    #[instrument(skip(self, request), fields(request_id = request.id))]
    async fn compare_and_update(
        &self,
        request: &ChannelRequest,
        expected_status: ChannelRequestStatus,
        expected_version: i64,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payflow_channel_requests
            SET status = $1, version = $2 + 1, retry_count = $3,
                gmt_next_execution = $4, gmt_last_execution = $5,
                request_response = $6, channel_trace_no = $7, callback_params = $8,
                request_exception = $9, close_reason = $10
            WHERE id = $11 AND status = $12 AND version = $2
            "#,
        )
        .bind(request.status.code())
        .bind(expected_version)
        .bind(request.retry_count)
        .bind(request.gmt_next_execution)
        .bind(request.gmt_last_execution)
        .bind(&request.request_response)
        .bind(&request.channel_trace_no)
        .bind(&request.callback_params)
        .bind(&request.request_exception)
        .bind(&request.close_reason)
        .bind(request.id)
        .bind(expected_status.code())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        debug!(applied, expected_version, "Conditional channel request update");
        Ok(applied)
    }
}
