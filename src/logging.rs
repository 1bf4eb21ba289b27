//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and a JSON
//! file, plus helpers that give every lifecycle change the same field layout.

use crate::models::RequestType;
use crate::state_machine::{ChannelRequestStatus, PayOrderStatus};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let file_layer_guard = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let pid = process::id();
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
                let file_name = format!("{environment}.{pid}.{timestamp}.log");
                let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
                Some(tracing_appender::non_blocking(file_appender))
            }
            Err(e) => {
                eprintln!("payflow: console-only logging, cannot create log directory: {e}");
                None
            }
        };

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(env_filter(&log_level));

        let (file_layer, guard) = match file_layer_guard {
            Some((writer, guard)) => (
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(env_filter(&log_level)),
                ),
                Some(guard),
            ),
            None => (None, None),
        };

        // Another subscriber may already be installed (tests, embedding hosts)
        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            "Structured logging initialized"
        );

        guard
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("PAYFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| crate::constants::system::DEFAULT_ENV.to_string())
        .to_lowercase()
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a committed pay order status change
pub fn log_order_transition(
    pay_order_no: &str,
    from: PayOrderStatus,
    to: PayOrderStatus,
    event: &str,
) {
    tracing::info!(
        pay_order_no = %pay_order_no,
        from = %from,
        to = %to,
        event = %event,
        "{}",
        crate::constants::events::ORDER_TRANSITIONED
    );
}

/// Log a committed channel request status change
pub fn log_request_transition(
    request_id: i64,
    pay_order_no: &str,
    request_type: RequestType,
    from: ChannelRequestStatus,
    to: ChannelRequestStatus,
    event: &str,
) {
    tracing::info!(
        request_id,
        pay_order_no = %pay_order_no,
        request_type = %request_type,
        from = %from,
        to = %to,
        event = %event,
        "{}",
        crate::constants::events::REQUEST_TRANSITIONED
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "operation failed"
    );
}
