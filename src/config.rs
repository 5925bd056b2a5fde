//! Ambient configuration tree (§6): every tunable enumerated in the external interfaces section,
//! loaded with the `config` crate from environment variables (prefix `ESCORE_`, `__` as the nested
//! separator) layered over the hand-written defaults below.
//!
//! Durations are stored as millisecond counts (so the `config` crate's environment source, which
//! only parses scalars, can populate them without an extra duration-parsing dependency) and
//! exposed as [`std::time::Duration`] through a `_duration()` accessor per field.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
}

/// Root configuration, composed of one section per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsConfig {
    /// Master toggle; when `false`, callers are expected to no-op the whole runtime.
    pub enabled: bool,
    pub store: StoreConfig,
    pub snapshot: SnapshotConfig,
    pub publisher: PublisherConfig,
    pub projection: ProjectionConfig,
    pub performance: PerformanceConfig,
    pub multitenancy: MultitenancyConfig,
    pub upcasting: UpcastingConfig,
}

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreConfig::default(),
            snapshot: SnapshotConfig::default(),
            publisher: PublisherConfig::default(),
            projection: ProjectionConfig::default(),
            performance: PerformanceConfig::default(),
            multitenancy: MultitenancyConfig::default(),
            upcasting: UpcastingConfig::default(),
        }
    }
}

impl EsConfig {
    /// Loads configuration from `ESCORE_*` environment variables layered over
    /// [`EsConfig::default`], e.g. `ESCORE_STORE__BATCH_SIZE=200`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;

        let built = config::Config::builder()
            .add_source(defaults)
            .add_source(config::Environment::with_prefix("ESCORE").separator("__"))
            .build()?;

        Ok(built.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Max events per append request.
    pub batch_size: usize,
    /// Cap on a single aggregate load.
    pub max_events_per_load: usize,
    pub connection_timeout_ms: u64,
    pub query_timeout_ms: u64,
    /// Enforce decode checks (schema + checksum validation) on read.
    pub validate_schemas: bool,
}

impl StoreConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_events_per_load: 1000,
            connection_timeout_ms: 30_000,
            query_timeout_ms: 30_000,
            validate_schemas: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Events per snapshot.
    pub threshold: i64,
    pub keep_count: u32,
    pub max_age_ms: u64,
    pub compression: bool,
    pub caching: bool,
    pub cache_ttl_ms: u64,
}

impl SnapshotConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 50,
            keep_count: 3,
            max_age_ms: 30 * 24 * 3_600_000,
            compression: true,
            caching: true,
            cache_ttl_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub publish_timeout_ms: u64,
    pub continue_on_failure: bool,
    pub retry: RetryConfig,
}

impl PublisherConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            publish_timeout_ms: 10_000,
            continue_on_failure: true,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1_000,
                max_delay_ms: 10_000,
                backoff_multiplier: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchProcessingConfig {
    pub default_batch_size: i64,
    pub default_interval_ms: u64,
    pub max_batch_size: i64,
    pub min_interval_ms: u64,
}

impl BatchProcessingConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub timeout_ms: u64,
    pub max_acceptable_lag: i64,
    pub fail_on_unhealthy_projection: bool,
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub batch_processing: BatchProcessingConfig,
    pub health_check: HealthCheckConfig,
    pub retry: RetryConfig,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            batch_processing: BatchProcessingConfig {
                default_batch_size: 100,
                default_interval_ms: 5_000,
                max_batch_size: 1000,
                min_interval_ms: 100,
            },
            health_check: HealthCheckConfig {
                timeout_ms: 5_000,
                max_acceptable_lag: 1000,
                fail_on_unhealthy_projection: true,
            },
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1_000,
                max_delay_ms: 300_000,
                backoff_multiplier: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_rate_threshold: f64,
    pub minimum_number_of_calls: u32,
    pub sliding_window_size_ms: u64,
    pub wait_duration_in_open_state_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn sliding_window_size(&self) -> Duration {
        Duration::from_millis(self.sliding_window_size_ms)
    }

    pub fn wait_duration_in_open_state(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_state_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_rate_threshold: 50.0,
            minimum_number_of_calls: 10,
            sliding_window_size_ms: 60_000,
            wait_duration_in_open_state_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub tracing_enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            tracing_enabled: true,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultitenancyConfig {
    pub enabled: bool,
    /// Reject events missing `tenant_id` once multitenancy is enabled.
    pub strict_mode: bool,
}

impl Default for MultitenancyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strict_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpcastingConfig {
    pub enabled: bool,
    /// Fail rather than pass an event through unchanged when no upcaster can act on it.
    pub strict_mode: bool,
    pub max_chain_length: u8,
}

impl Default for UpcastingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_mode: false,
            max_chain_length: 10,
        }
    }
}
