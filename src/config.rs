use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::logging::{LogRotation, LoggingConfig};
use crate::monitor::{ResourceLimits, ResourceMonitorOptions};
use crate::pool::WorkerPoolConfig;
use crate::queue::{PriorityPattern, PriorityQueueConfig, QueueConfig};
use crate::throttle::ThrottleConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// `[queue]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct QueueTomlConfig {
    pub max_concurrent: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub priority_patterns: Option<Vec<PriorityPattern>>,
    pub enable_progress_reporting: Option<bool>,
    pub progress_update_interval_ms: Option<u64>,
}

/// `[priority_queue]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct PriorityQueueTomlConfig {
    pub max_size: Option<usize>,
    pub default_priority: Option<i32>,
    pub max_attempts: Option<u32>,
    pub starvation_threshold_ms: Option<u64>,
    pub starvation_boost: Option<i32>,
    pub retry_priority_boost: Option<i32>,
}

/// `[monitor]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct MonitorTomlConfig {
    pub interval_ms: Option<u64>,
    pub max_memory_usage: Option<f64>,
    pub max_cpu_usage: Option<f64>,
    pub max_network_connections: Option<u64>,
    pub max_requests_per_second: Option<f64>,
    pub enable_alerts: Option<bool>,
    pub enable_throttling: Option<bool>,
    pub history_retention_ms: Option<u64>,
    pub max_alerts: Option<usize>,
}

/// `[throttle]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct ThrottleTomlConfig {
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub concurrent_requests: Option<usize>,
    pub delay_between_requests_ms: Option<u64>,
    pub burst_limit: Option<u32>,
    pub burst_window_ms: Option<u64>,
    pub enable_backoff: Option<bool>,
    pub backoff_multiplier: Option<f64>,
    pub base_backoff_delay_ms: Option<u64>,
    pub max_backoff_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// `[pool]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct PoolTomlConfig {
    pub pool_size: Option<usize>,
    pub acquire_poll_interval_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub memory_warning_mb: Option<u64>,
    pub cpu_warning_percent: Option<f64>,
}

/// `[logging]` section
#[derive(Debug, Clone, Default, Deserialize)]
struct LoggingTomlConfig {
    pub log_dir: Option<String>,
    pub level_filter: Option<String>,
    /// "daily", "hourly" or "never"
    pub rotation: Option<String>,
    pub console_timestamps: Option<bool>,
    pub file_json_format: Option<bool>,
    pub keep_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TomlConfig {
    pub queue: Option<QueueTomlConfig>,
    pub priority_queue: Option<PriorityQueueTomlConfig>,
    pub monitor: Option<MonitorTomlConfig>,
    pub throttle: Option<ThrottleTomlConfig>,
    pub pool: Option<PoolTomlConfig>,
    pub logging: Option<LoggingTomlConfig>,
}

fn millis(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(fallback)
}

/// Runtime configuration for every component
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub queue: QueueConfig,
    pub priority_queue: PriorityQueueConfig,
    pub monitor: ResourceMonitorOptions,
    pub throttle: ThrottleConfig,
    pub pool: WorkerPoolConfig,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("⚙️ Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text; absent values keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let config = Self::from_toml_config(toml_config);
        config.validate()?;
        Ok(config)
    }

    fn from_toml_config(toml_config: TomlConfig) -> Self {
        let queue = {
            let t = toml_config.queue.unwrap_or_default();
            let d = QueueConfig::default();
            QueueConfig {
                max_concurrent: t.max_concurrent.unwrap_or(d.max_concurrent),
                max_retries: t.max_retries.unwrap_or(d.max_retries),
                retry_delay: millis(t.retry_delay_ms, d.retry_delay),
                timeout: millis(t.timeout_ms, d.timeout),
                priority_patterns: t.priority_patterns.unwrap_or(d.priority_patterns),
                enable_progress_reporting: t.enable_progress_reporting.unwrap_or(d.enable_progress_reporting),
                progress_update_interval: millis(t.progress_update_interval_ms, d.progress_update_interval),
            }
        };

        let priority_queue = {
            let t = toml_config.priority_queue.unwrap_or_default();
            let d = PriorityQueueConfig::default();
            PriorityQueueConfig {
                max_size: t.max_size.unwrap_or(d.max_size),
                default_priority: t.default_priority.unwrap_or(d.default_priority),
                max_attempts: t.max_attempts.unwrap_or(queue.max_retries),
                starvation_threshold: millis(t.starvation_threshold_ms, d.starvation_threshold),
                starvation_boost: t.starvation_boost.unwrap_or(d.starvation_boost),
                retry_priority_boost: t.retry_priority_boost.unwrap_or(d.retry_priority_boost),
            }
        };

        let monitor = {
            let t = toml_config.monitor.unwrap_or_default();
            let d = ResourceMonitorOptions::default();
            ResourceMonitorOptions {
                interval: millis(t.interval_ms, d.interval),
                limits: ResourceLimits {
                    max_memory_usage: t.max_memory_usage.unwrap_or(d.limits.max_memory_usage),
                    max_cpu_usage: t.max_cpu_usage.unwrap_or(d.limits.max_cpu_usage),
                    max_network_connections: t.max_network_connections.unwrap_or(d.limits.max_network_connections),
                    max_requests_per_second: t.max_requests_per_second.unwrap_or(d.limits.max_requests_per_second),
                },
                enable_alerts: t.enable_alerts.unwrap_or(d.enable_alerts),
                enable_throttling: t.enable_throttling.unwrap_or(d.enable_throttling),
                history_retention: millis(t.history_retention_ms, d.history_retention),
                max_alerts: t.max_alerts.unwrap_or(d.max_alerts),
            }
        };

        let throttle = {
            let t = toml_config.throttle.unwrap_or_default();
            let d = ThrottleConfig::default();
            ThrottleConfig {
                requests_per_second: t.requests_per_second.unwrap_or(d.requests_per_second),
                requests_per_minute: t.requests_per_minute.unwrap_or(d.requests_per_minute),
                concurrent_requests: t.concurrent_requests.unwrap_or(d.concurrent_requests),
                delay_between_requests: millis(t.delay_between_requests_ms, d.delay_between_requests),
                burst_limit: t.burst_limit.unwrap_or(d.burst_limit),
                burst_window: millis(t.burst_window_ms, d.burst_window),
                enable_backoff: t.enable_backoff.unwrap_or(d.enable_backoff),
                backoff_multiplier: t.backoff_multiplier.unwrap_or(d.backoff_multiplier),
                base_backoff_delay: millis(t.base_backoff_delay_ms, d.base_backoff_delay),
                max_backoff_delay: millis(t.max_backoff_delay_ms, d.max_backoff_delay),
                poll_interval: millis(t.poll_interval_ms, d.poll_interval),
            }
        };

        let pool = {
            let t = toml_config.pool.unwrap_or_default();
            let d = WorkerPoolConfig::default();
            WorkerPoolConfig {
                pool_size: t.pool_size.unwrap_or(d.pool_size),
                acquire_poll_interval: millis(t.acquire_poll_interval_ms, d.acquire_poll_interval),
                acquire_timeout: millis(t.acquire_timeout_ms, d.acquire_timeout),
                memory_warning_bytes: t
                    .memory_warning_mb
                    .map(|mb| mb * 1024 * 1024)
                    .unwrap_or(d.memory_warning_bytes),
                cpu_warning_percent: t.cpu_warning_percent.unwrap_or(d.cpu_warning_percent),
            }
        };

        let logging = {
            let t = toml_config.logging.unwrap_or_default();
            let d = LoggingConfig::default();
            LoggingConfig {
                log_dir: t.log_dir.unwrap_or(d.log_dir),
                level_filter: t.level_filter.unwrap_or(d.level_filter),
                rotation: t.rotation.as_deref().map(LogRotation::parse).unwrap_or(d.rotation),
                console_timestamps: t.console_timestamps.unwrap_or(d.console_timestamps),
                file_json_format: t.file_json_format.unwrap_or(d.file_json_format),
                keep_days: t.keep_days.unwrap_or(d.keep_days),
            }
        };

        Self {
            queue,
            priority_queue,
            monitor,
            throttle,
            pool,
            logging,
        }
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.queue.max_concurrent == 0 {
            return invalid("queue.max_concurrent must be at least 1");
        }
        if self.queue.max_retries == 0 {
            return invalid("queue.max_retries must be at least 1");
        }
        if self.queue.timeout.is_zero() {
            return invalid("queue.timeout_ms must be positive");
        }
        if self.priority_queue.max_size == 0 {
            return invalid("priority_queue.max_size must be at least 1");
        }
        if self.priority_queue.max_attempts == 0 {
            return invalid("priority_queue.max_attempts must be at least 1");
        }
        if self.pool.pool_size == 0 {
            return invalid("pool.pool_size must be at least 1");
        }
        if self.monitor.interval.is_zero() {
            return invalid("monitor.interval_ms must be positive");
        }
        let rate = self.monitor.limits.max_requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return invalid("monitor.max_requests_per_second must be a positive finite number");
        }
        self.throttle
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.throttle, ThrottleConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            [queue]
            max_concurrent = 6
            retry_delay_ms = 250
            priority_patterns = [
                { pattern = "/checkout", priority = 10 },
            ]

            [priority_queue]
            starvation_threshold_ms = 5000

            [monitor]
            max_memory_usage = 70.0
            enable_throttling = false

            [throttle]
            requests_per_second = 4
            burst_window_ms = 2000

            [pool]
            pool_size = 2
            memory_warning_mb = 512

            [logging]
            rotation = "hourly"
            file_json_format = false
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_concurrent, 6);
        assert_eq!(config.queue.retry_delay, Duration::from_millis(250));
        assert_eq!(config.queue.priority_patterns[0].priority, 10);
        assert_eq!(config.priority_queue.starvation_threshold, Duration::from_secs(5));
        assert_eq!(config.priority_queue.max_attempts, 3);
        assert_eq!(config.monitor.limits.max_memory_usage, 70.0);
        assert!(!config.monitor.enable_throttling);
        assert_eq!(config.throttle.requests_per_second, 4);
        assert_eq!(config.throttle.burst_window, Duration::from_secs(2));
        assert_eq!(config.pool.pool_size, 2);
        assert_eq!(config.pool.memory_warning_bytes, 512 * 1024 * 1024);
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let err = OrchestratorConfig::from_toml_str("[queue]\nmax_concurrent = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = OrchestratorConfig::from_toml_str("[pool]\npool_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = OrchestratorConfig::from_toml_str("[throttle]\nrequests_per_minute = 0\n").unwrap_err();
        assert!(err.to_string().contains("request rates"));
    }

    #[test]
    fn test_non_finite_backoff_multiplier_is_rejected() {
        for value in ["nan", "inf", "-inf", "0.5"] {
            let document = format!("[throttle]\nbackoff_multiplier = {}\n", value);
            let err = OrchestratorConfig::from_toml_str(&document).unwrap_err();
            assert!(err.to_string().contains("backoff_multiplier"), "{}: {}", value, err);
        }
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = OrchestratorConfig::from_toml_str("[queue\nmax_concurrent = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\nmax_concurrent = 1\ntimeout_ms = 1500").unwrap();

        let config = OrchestratorConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.queue.max_concurrent, 1);
        assert_eq!(config.queue.timeout, Duration::from_millis(1500));

        assert!(matches!(
            OrchestratorConfig::from_toml("/no/such/config.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
