//! Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment
//! detection and merging of per-environment override sections.

use super::error::{ConfigResult, ConfigurationError};
use super::PayflowConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["payflow-config.yaml", "payflow-config.yml"];
const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

pub struct ConfigManager {
    config: PayflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = crate::logging::get_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;
        Self::apply_database_url_override(&mut config, env::var("DATABASE_URL").ok());

        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            worker_count = config.scheduler.worker_count,
            batch_size = config.scheduler.batch_size,
            max_connections = config.database.max_connections,
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &PayflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn apply_database_url_override(config: &mut PayflowConfig, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            debug!("Using DATABASE_URL from environment");
            config.database.url = url;
        }
    }

    fn sanitize_config_for_logging(config: &PayflowConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        if let Some(url) = config_json.pointer_mut("/database/url") {
            if let Some(masked) = url.as_str().map(mask_database_url) {
                *url = serde_json::Value::String(masked);
            }
        }
        config_json
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            if config_path.is_file() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
            searched_paths.push(config_path);
        }

        Err(ConfigurationError::NotFound {
            candidates: searched_paths,
        })
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata =
            std::fs::metadata(path).map_err(|e| ConfigurationError::unreadable(path, e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: MAX_CONFIG_FILE_SIZE,
            });
        }

        std::fs::read_to_string(path).map_err(|e| ConfigurationError::unreadable(path, e))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<PayflowConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::malformed(&config_file, e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        }

        let mut config: PayflowConfig = serde_yaml::from_value(yaml_data)
            .map_err(|e| ConfigurationError::malformed(&config_file, e))?;

        config.env = environment.to_string();
        Ok(config)
    }
}

/// Recursively merge environment overrides into the base mapping
fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
    match (&mut *base, override_value) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_ref, override_val) => *base_ref = override_val,
    }
}

/// Hide the password component of a connection URL
fn mask_database_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "[MASKED]".to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
