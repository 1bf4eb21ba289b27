use payflow_core::config::{ConfigManager, PayflowConfig};
use payflow_core::orchestration::{
    ErrorClassifier, ErrorClassifierConfig, ErrorContext, RetryDecision, StandardErrorClassifier,
};
use payflow_core::channel::DispatchError;
use payflow_core::models::RequestType;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn load(environment: &str) -> Arc<ConfigManager> {
    ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), environment)
        .unwrap_or_else(|e| panic!("shipped config must load for {environment}: {e}"))
}

#[test]
fn test_shipped_config_loads_for_every_environment() {
    for environment in ["development", "test", "production"] {
        let manager = load(environment);
        let config: &PayflowConfig = manager.config();

        assert_eq!(manager.environment(), environment);
        assert_eq!(config.env, environment);
        assert_eq!(config.scheduler.retry_interval_seconds, 300);
        assert!(config.scheduler.lease() >= config.scheduler.dispatch_timeout());
        assert!(config.validate().is_ok());
    }
}

#[test]
fn test_test_environment_is_tuned_for_fast_runs() {
    let manager = load("test");
    let scheduler = &manager.config().scheduler;

    assert_eq!(scheduler.poll_interval(), Duration::from_millis(50));
    assert_eq!(scheduler.dispatch_timeout(), Duration::from_secs(1));
    assert_eq!(scheduler.lease(), Duration::from_secs(5));
    assert_eq!(scheduler.worker_count, 2);
    // Inherited from the base section
    assert_eq!(scheduler.batch_size, 50);
    assert_eq!(scheduler.max_retry_count, None);
}

#[test]
fn test_production_caps_retries() {
    let manager = load("production");
    let config = manager.config();

    assert_eq!(config.scheduler.max_retry_count, Some(20));
    assert_eq!(config.scheduler.worker_count, 16);
    assert_eq!(config.database.max_connections, 50);

    let classifier =
        StandardErrorClassifier::with_config(ErrorClassifierConfig::from(&config.scheduler));
    let context = ErrorContext {
        request_id: 1,
        pay_order_no: "PO1".to_string(),
        request_type: RequestType::Payment,
        retry_count: 20,
        execution_duration: Duration::from_millis(10),
    };
    let decision = classifier
        .classify(&DispatchError::Transport("reset".to_string()), &context)
        .decision;
    assert!(matches!(decision, RetryDecision::Close { .. }));
}

#[test]
fn test_shipped_config_uses_package_user_agent() {
    let manager = load("production");
    assert_eq!(
        manager.config().notification.user_agent,
        format!("payflow-core/{}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn test_debug_config_masks_credentials() {
    let manager = load("development");
    let rendered = manager.debug_config().to_string();
    assert!(!rendered.contains("payflow:payflow@"));
}
