//! Backpressure detection.
//!
//! # State Machine
//!
//! ```text
//!                depth >= high_watermark
//!                or resource >= threshold
//!   ┌──────────┐ ───────────────────────► ┌──────────┐
//!   │ Released │                          │ Engaged  │
//!   └──────────┘ ◄─────────────────────── └──────────┘
//!                depth < low_watermark
//!                and all resources < threshold
//! ```
//!
//! The gap between the watermarks keeps a queue hovering around the limit
//! from toggling on every event.

use crate::config::BackpressureConfig;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Resource utilisation, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSignals {
    /// Fraction of the memory budget in use.
    pub memory_pressure: f64,
    /// Fraction of CPU capacity in use.
    pub cpu_pressure: f64,
}

/// Source of resource signals consulted on every enqueue.
///
/// Implementations must be cheap; sampling happens under the queue lock.
pub trait ResourceProbe: Send + Sync + std::fmt::Debug {
    /// Returns the current signals.
    fn sample(&self) -> ResourceSignals;
}

/// Probe reporting zero pressure. Depth alone drives backpressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPressure;

impl ResourceProbe for NoPressure {
    fn sample(&self) -> ResourceSignals {
        ResourceSignals::default()
    }
}

/// Why an enqueue met backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureCause {
    /// Depth reached the high watermark.
    Depth {
        /// Configured high watermark.
        high_watermark: usize,
    },
    /// Pressure engaged earlier and depth has not yet fallen below the low
    /// watermark.
    Draining {
        /// Depth must fall below this to release.
        low_watermark: usize,
    },
    /// A memory or CPU signal is at or above its threshold.
    Resource,
}

impl fmt::Display for PressureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depth { high_watermark } => write!(f, "depth at high watermark {high_watermark}"),
            Self::Draining { low_watermark } => {
                write!(f, "draining until depth < {low_watermark}")
            }
            Self::Resource => f.write_str("resource pressure"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct BackpressureMonitor {
    config: BackpressureConfig,
    probe: Arc<dyn ResourceProbe>,
}

impl BackpressureMonitor {
    pub(crate) fn new(config: BackpressureConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        Self { config, probe }
    }

    pub(crate) fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Release threshold. An empty queue always releases depth pressure.
    fn low_watermark(&self) -> usize {
        self.config.low_watermark.max(1)
    }

    /// Updates `engaged` for the current depth. Returns the cause while
    /// pressure is engaged, `None` once released.
    pub(crate) fn evaluate(
        &self,
        label: &str,
        depth: usize,
        engaged: &mut bool,
    ) -> Option<PressureCause> {
        let signals = self.probe.sample();
        let resource_hot = signals.memory_pressure >= self.config.memory_threshold
            || signals.cpu_pressure >= self.config.cpu_threshold;
        let low_watermark = self.low_watermark();

        if *engaged {
            if depth < low_watermark && !resource_hot {
                *engaged = false;
                info!(queue = label, depth, "Backpressure released");
                return None;
            }
        } else if depth >= self.config.high_watermark || resource_hot {
            *engaged = true;
            warn!(
                queue = label,
                depth,
                high_watermark = self.config.high_watermark,
                memory = signals.memory_pressure,
                cpu = signals.cpu_pressure,
                "Backpressure engaged"
            );
        } else {
            return None;
        }

        Some(if depth >= self.config.high_watermark {
            PressureCause::Depth {
                high_watermark: self.config.high_watermark,
            }
        } else if resource_hot {
            PressureCause::Resource
        } else {
            PressureCause::Draining { low_watermark }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct FixedProbe(Mutex<ResourceSignals>);

    impl ResourceProbe for FixedProbe {
        fn sample(&self) -> ResourceSignals {
            *self.0.lock()
        }
    }

    fn config() -> BackpressureConfig {
        BackpressureConfig {
            high_watermark: 10,
            low_watermark: 5,
            ..BackpressureConfig::default()
        }
    }

    #[test]
    fn hysteresis_between_watermarks() {
        let monitor = BackpressureMonitor::new(config(), Arc::new(NoPressure));
        let mut engaged = false;

        assert_eq!(monitor.evaluate("q", 9, &mut engaged), None);
        assert_eq!(
            monitor.evaluate("q", 10, &mut engaged),
            Some(PressureCause::Depth { high_watermark: 10 })
        );
        // still engaged between the watermarks
        assert_eq!(
            monitor.evaluate("q", 7, &mut engaged),
            Some(PressureCause::Draining { low_watermark: 5 })
        );
        assert!(monitor.evaluate("q", 5, &mut engaged).is_some());
        assert_eq!(monitor.evaluate("q", 4, &mut engaged), None);
        assert_eq!(monitor.evaluate("q", 9, &mut engaged), None);
    }

    #[test]
    fn zero_low_watermark_releases_on_empty_queue() {
        let config = BackpressureConfig {
            high_watermark: 2,
            low_watermark: 0,
            ..BackpressureConfig::default()
        };
        let monitor = BackpressureMonitor::new(config, Arc::new(NoPressure));
        let mut engaged = false;

        assert!(monitor.evaluate("q", 2, &mut engaged).is_some());
        assert!(monitor.evaluate("q", 1, &mut engaged).is_some());
        assert_eq!(monitor.evaluate("q", 0, &mut engaged), None);
        assert!(!engaged);
    }

    #[test]
    fn resource_signal_engages_on_empty_queue() {
        let probe = Arc::new(FixedProbe::default());
        let monitor = BackpressureMonitor::new(config(), Arc::clone(&probe) as Arc<dyn ResourceProbe>);
        let mut engaged = false;

        probe.0.lock().memory_pressure = 0.95;
        assert_eq!(
            monitor.evaluate("q", 0, &mut engaged),
            Some(PressureCause::Resource)
        );

        probe.0.lock().memory_pressure = 0.1;
        assert_eq!(monitor.evaluate("q", 0, &mut engaged), None);
    }

    #[test]
    fn cause_display_names_the_trigger() {
        assert_eq!(
            PressureCause::Draining { low_watermark: 3 }.to_string(),
            "draining until depth < 3"
        );
        assert_eq!(PressureCause::Resource.to_string(), "resource pressure");
    }
}
