//! Configuration management with hierarchical layering.
//!
//! # Architecture
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌─────────────────────────────────────────────────┐
//! │  1. Environment Variables (KERNBUS_*)           │  Runtime override
//! ├─────────────────────────────────────────────────┤
//! │  2. Project Config (.kernbus/config.toml)       │  Deployment-specific
//! ├─────────────────────────────────────────────────┤
//! │  3. Global Config (~/.kernbus/config.toml)      │  Host defaults
//! ├─────────────────────────────────────────────────┤
//! │  4. Default Values (compile-time)               │  Fallback
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `KERNBUS_BATCH_SIZE` | `queue.batch_size` | usize |
//! | `KERNBUS_MAX_RETRIES` | `queue.max_retries` | u32 |
//! | `KERNBUS_BACKPRESSURE_POLICY` | `backpressure.policy` | reject / delay / shed_lowest |
//! | `KERNBUS_HIGH_WATERMARK` | `backpressure.high_watermark` | usize |
//! | `KERNBUS_LOW_WATERMARK` | `backpressure.low_watermark` | usize |
//! | `KERNBUS_MAX_EVENTS` | `kernel.max_events` | u64 |
//! | `KERNBUS_REQUEST_TIMEOUT_MS` | `router.default_timeout_ms` | u64 |
//! | `KERNBUS_TICK_INTERVAL_MS` | `scheduler.tick_interval_ms` | u64 |
//! | `KERNBUS_EVICT_TERMINAL` | `scheduler.evict_terminal` | bool |
//! | `KERNBUS_PERSISTOR_BACKEND` | `persistor.backend` | memory / document-store |
//! | `KERNBUS_PERSISTOR_CONNECTION` | `persistor.connection` | String |
//!
//! # Example Configuration
//!
//! ```toml
//! # ~/.kernbus/config.toml
//!
//! [queue]
//! batch_size = 64
//! chunk_size = 8
//! max_retries = 3
//!
//! [backpressure]
//! policy = "delay"
//! high_watermark = 10000
//! low_watermark = 8000
//! max_delay_ms = 250
//!
//! [kernel]
//! max_events = 100000
//! loop_window_ms = 10000
//! loop_max_events = 1000
//!
//! [routing]
//! observability_prefixes = ["observability.", "telemetry."]
//!
//! [persistor]
//! backend = "document-store"
//! connection = "/var/lib/kernbus"
//! ttl_ms = 604800000
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{
    BackpressureConfig, BackpressurePolicy, BusConfig, KernelConfig, PersistorBackend,
    PersistorConfig, QueueConfig, RouterConfig, RoutingConfig, SchedulerConfig,
};

/// Project-local config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".kernbus";

/// Config file name inside a config directory.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(PROJECT_CONFIG_DIR)
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join(PROJECT_CONFIG_FILE)
}
