//! Service configuration
//!
//! Loaded from `labelcheck.toml`; every section is optional. Service endpoints
//! can be overridden from the environment.

use labelcheck_common::config::TomlConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::DispatcherOptions;
use crate::utils::RetryPolicy;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "labelcheck.toml";

pub const EXTRACTION_URL_ENV: &str = "LABELCHECK_EXTRACTION_URL";
pub const EVALUATION_URL_ENV: &str = "LABELCHECK_EVALUATION_URL";

/// Default listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5840";

/// Full contents of `labelcheck.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub common: TomlConfig,
    pub pipeline: PipelineConfig,
    pub services: ServicesConfig,
    pub transport: TransportConfig,
}

impl ServiceConfig {
    /// Apply `LABELCHECK_*_URL` overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env(EXTRACTION_URL_ENV) {
            self.services.extraction_url = Some(url);
        }
        if let Some(url) = non_empty_env(EVALUATION_URL_ENV) {
            self.services.evaluation_url = Some(url);
        }
    }

    pub fn bind_address(&self) -> &str {
        self.common
            .bind_address
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDRESS)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retries per evaluation check after the first attempt
    pub check_max_retries: u32,
    pub evaluation_timeout_secs: u64,
    pub extraction_timeout_secs: u64,
    /// Retries of the extraction call after the first attempt
    pub extraction_max_retries: u32,
    /// Delay before the first retry of a collaborator call; doubles per retry
    pub retry_backoff_ms: u64,
    /// Concurrent evaluation calls within one group
    pub max_concurrent_checks: usize,
    /// Concurrent detector computations within one group
    pub detector_workers: usize,
    /// Upper bound on retrying a store operation that hit a lock
    pub db_max_lock_wait_ms: u64,
    /// Non-terminal jobs untouched for this long are failed by the sweeper
    pub stalled_job_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            check_max_retries: 2,
            evaluation_timeout_secs: 60,
            extraction_timeout_secs: 120,
            extraction_max_retries: 2,
            retry_backoff_ms: 200,
            max_concurrent_checks: 4,
            detector_workers: 2,
            db_max_lock_wait_ms: 5000,
            stalled_job_timeout_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub fn evaluation_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.evaluation_timeout_secs),
            max_retries: self.check_max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn extraction_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.extraction_timeout_secs),
            max_retries: self.extraction_max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn stalled_job_timeout(&self) -> Duration {
        Duration::from_secs(self.stalled_job_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Same settings with all in-handler concurrency collapsed to 1
    pub fn sequential(&self) -> Self {
        Self {
            max_concurrent_checks: 1,
            detector_workers: 1,
            ..self.clone()
        }
    }
}

/// Collaborator endpoints; unset means offline stand-ins are used
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub extraction_url: Option<String>,
    pub evaluation_url: Option<String>,
}

/// How published messages reach the handlers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// In-process channel and dispatcher
    #[default]
    Channel,
    /// HTTP POST to `push_base_url`
    Http,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Channel => "channel",
            TransportMode::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Base URL of the service receiving `/push/*` deliveries (http mode)
    pub push_base_url: Option<String>,
    pub push_timeout_secs: u64,
    pub max_deliveries: u32,
    pub redelivery_backoff_ms: u64,
    /// Deliver every message twice (channel mode)
    pub duplicate_delivery: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Channel,
            push_base_url: None,
            push_timeout_secs: 30,
            max_deliveries: 5,
            redelivery_backoff_ms: 500,
            duplicate_delivery: false,
        }
    }
}

impl TransportConfig {
    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            max_deliveries: self.max_deliveries,
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            duplicate_delivery: self.duplicate_delivery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.check_max_retries, 2);
        assert_eq!(config.evaluation_policy().max_attempts(), 3);
        assert_eq!(config.evaluation_policy().timeout, Duration::from_secs(60));
        assert_eq!(config.extraction_policy().timeout, Duration::from_secs(120));
        assert_eq!(TransportConfig::default().max_deliveries, 5);
    }

    #[test]
    fn test_parse_partial_file() {
        let toml_str = r#"
            root_folder = "/srv/labelcheck"

            [logging]
            level = "debug"

            [pipeline]
            max_concurrent_checks = 8

            [transport]
            mode = "http"
            push_base_url = "http://127.0.0.1:5840"
        "#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.common.root_folder.as_deref(),
            Some(std::path::Path::new("/srv/labelcheck"))
        );
        assert_eq!(config.common.logging.level, "debug");
        assert_eq!(config.pipeline.max_concurrent_checks, 8);
        assert_eq!(config.pipeline.check_max_retries, 2);
        assert_eq!(config.transport.mode, TransportMode::Http);
        assert_eq!(config.bind_address(), DEFAULT_BIND_ADDRESS);
    }

    #[test]
    #[serial]
    fn test_env_overrides_service_urls() {
        std::env::set_var(EXTRACTION_URL_ENV, "http://extract.local");
        std::env::remove_var(EVALUATION_URL_ENV);
        let mut config = ServiceConfig::default();
        config.services.evaluation_url = Some("http://from-file".to_string());
        config.apply_env_overrides();
        std::env::remove_var(EXTRACTION_URL_ENV);

        assert_eq!(config.services.extraction_url.as_deref(), Some("http://extract.local"));
        assert_eq!(config.services.evaluation_url.as_deref(), Some("http://from-file"));
    }

    #[test]
    fn test_sequential_collapses_concurrency() {
        let config = PipelineConfig::default().sequential();
        assert_eq!(config.max_concurrent_checks, 1);
        assert_eq!(config.detector_workers, 1);
    }
}
