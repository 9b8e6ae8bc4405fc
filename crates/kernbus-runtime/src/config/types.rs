//! Configuration types.
//!
//! All types implement [`Default`] so a missing file, section or key falls
//! back to compile-time values.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complete bus configuration after all layers are merged.
///
/// # Example
///
/// ```
/// use kernbus_runtime::config::{BackpressurePolicy, BusConfig};
///
/// let config = BusConfig::default();
/// assert_eq!(config.backpressure.policy, BackpressurePolicy::Reject);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// EventQueue draining, retries, dedup and dead letters.
    pub queue: QueueConfig,
    /// Congestion control thresholds and policy.
    pub backpressure: BackpressureConfig,
    /// Per-kernel quotas and loop protection.
    pub kernel: KernelConfig,
    /// Request/response defaults.
    pub router: RouterConfig,
    /// Event-type to kernel routing.
    pub routing: RoutingConfig,
    /// Engine tick and eviction.
    pub scheduler: SchedulerConfig,
    /// Snapshot storage backend.
    pub persistor: PersistorConfig,
}

impl BusConfig {
    /// Serializes to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not match the schema.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Rejects values the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.batch_size == 0 {
            return Err(ConfigError::invalid("queue.batch_size", "must be > 0"));
        }
        if self.queue.chunk_size == 0 {
            return Err(ConfigError::invalid("queue.chunk_size", "must be > 0"));
        }
        if self.queue.dedup_capacity == 0 {
            return Err(ConfigError::invalid("queue.dedup_capacity", "must be > 0"));
        }
        if self.backpressure.high_watermark == 0 {
            return Err(ConfigError::invalid(
                "backpressure.high_watermark",
                "must be > 0",
            ));
        }
        if self.backpressure.low_watermark == 0 {
            return Err(ConfigError::invalid(
                "backpressure.low_watermark",
                "must be > 0",
            ));
        }
        if self.backpressure.low_watermark > self.backpressure.high_watermark {
            return Err(ConfigError::invalid(
                "backpressure.low_watermark",
                "must not exceed high_watermark",
            ));
        }
        for (field, value) in [
            ("backpressure.memory_threshold", self.backpressure.memory_threshold),
            ("backpressure.cpu_threshold", self.backpressure.cpu_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, "must be within 0.0..=1.0"));
            }
        }
        if self.kernel.loop_window_ms == 0 {
            return Err(ConfigError::invalid("kernel.loop_window_ms", "must be > 0"));
        }
        if self.router.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid("router.sweep_interval_ms", "must be > 0"));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "scheduler.tick_interval_ms",
                "must be > 0",
            ));
        }
        if self.persistor.backend == PersistorBackend::DocumentStore
            && self.persistor.connection.is_empty()
        {
            return Err(ConfigError::invalid(
                "persistor.connection",
                "document-store backend requires a connection path",
            ));
        }
        Ok(())
    }
}

/// EventQueue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum events popped per drain call.
    pub batch_size: usize,
    /// Events dispatched concurrently within one batch.
    pub chunk_size: usize,
    /// Redeliveries allowed after the first failed attempt.
    pub max_retries: u32,
    /// Maximum ids remembered by the dedup cache.
    pub dedup_capacity: usize,
    /// How long a processed id stays in the dedup cache.
    pub dedup_ttl_ms: u64,
    /// Dead letters retained per kernel (oldest dropped first).
    pub dead_letter_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            chunk_size: 8,
            max_retries: 3,
            dedup_capacity: 10_000,
            dedup_ttl_ms: 300_000,
            dead_letter_capacity: 1_000,
        }
    }
}

/// What `enqueue` does while backpressure is engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail fast with a backpressure error.
    #[default]
    Reject,
    /// Wait up to `max_delay_ms` for the pressure to clear, then reject.
    Delay,
    /// Evict the lowest-priority queued event if the new one outranks it.
    ShedLowest,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reject => "reject",
            Self::Delay => "delay",
            Self::ShedLowest => "shed_lowest",
        })
    }
}

impl FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" => Ok(Self::Reject),
            "delay" => Ok(Self::Delay),
            "shed_lowest" | "shed" => Ok(Self::ShedLowest),
            other => Err(format!("unknown backpressure policy '{other}'")),
        }
    }
}

/// Backpressure thresholds.
///
/// Pressure engages when depth reaches `high_watermark` or a resource
/// signal reaches its threshold, and releases once depth is below
/// `low_watermark` and every resource signal is below its threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Behavior while engaged.
    pub policy: BackpressurePolicy,
    /// Queue depth at which pressure engages.
    pub high_watermark: usize,
    /// Queue depth below which pressure releases.
    pub low_watermark: usize,
    /// Longest time a delayed `enqueue` waits.
    pub max_delay_ms: u64,
    /// Memory pressure (0.0..=1.0) at which pressure engages.
    pub memory_threshold: f64,
    /// CPU pressure (0.0..=1.0) at which pressure engages.
    pub cpu_threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            policy: BackpressurePolicy::Reject,
            high_watermark: 10_000,
            low_watermark: 8_000,
            max_delay_ms: 250,
            memory_threshold: 0.9,
            cpu_threshold: 0.95,
        }
    }
}

/// Kernel quotas and loop protection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// Events a kernel may record before failing with QuotaExceeded.
    pub max_events: u64,
    /// Active running time budget.
    pub max_duration_ms: u64,
    /// Sliding window used by loop protection.
    pub loop_window_ms: u64,
    /// Events of one type allowed inside the window.
    pub loop_max_events: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            max_duration_ms: 3_600_000,
            loop_window_ms: 10_000,
            loop_max_events: 1_000,
        }
    }
}

/// RequestRouter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Timeout used when a caller does not pass one.
    pub default_timeout_ms: u64,
    /// Interval of the expired-waiter sweep.
    pub sweep_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
        }
    }
}

/// Event-type routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Event-type prefixes routed to the observability kernel.
    pub observability_prefixes: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            observability_prefixes: crate::registry::DEFAULT_OBSERVABILITY_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

/// Engine scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval of the drain-all tick.
    pub tick_interval_ms: u64,
    /// Evict executions whose business kernel reached a terminal status.
    pub evict_terminal: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            evict_terminal: true,
        }
    }
}

/// Snapshot storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PersistorBackend {
    /// Process-local map.
    #[default]
    #[serde(rename = "memory")]
    Memory,
    /// One JSON document per snapshot on disk.
    #[serde(rename = "document-store")]
    DocumentStore,
}

impl fmt::Display for PersistorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::DocumentStore => "document-store",
        })
    }
}

impl FromStr for PersistorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "document-store" | "document_store" | "document" => Ok(Self::DocumentStore),
            other => Err(format!("unknown persistor backend '{other}'")),
        }
    }
}

/// Persistor configuration.
///
/// Only backend selection and tuning live here; no runtime logic depends
/// on a backend beyond the four Persistor operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistorConfig {
    /// Backend type.
    pub backend: PersistorBackend,
    /// Backend location. A directory path for `document-store`.
    pub connection: String,
    /// Top-level namespace inside the backend.
    pub namespace: String,
    /// Collection holding snapshot documents.
    pub collection: String,
    /// Maximum snapshots removed by one prune pass.
    pub batch_size: usize,
    /// Minimum interval between TTL prunes triggered by appends.
    pub flush_interval_ms: u64,
    /// Snapshots older than this are pruned. `None` keeps them forever.
    pub ttl_ms: Option<u64>,
}

impl Default for PersistorConfig {
    fn default() -> Self {
        Self {
            backend: PersistorBackend::Memory,
            connection: String::new(),
            namespace: "kernbus".into(),
            collection: "snapshots".into(),
            batch_size: 100,
            flush_interval_ms: 1_000,
            ttl_ms: None,
        }
    }
}
