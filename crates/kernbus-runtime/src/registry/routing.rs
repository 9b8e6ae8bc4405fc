//! Event-type to kernel routing.
//!
//! Routing is a pure function of the event type. Producers, handler
//! registration and the request router all call the same function, so a
//! response can never be awaited on a kernel other than the one it is
//! delivered to.
//!
//! | Event type | Kernel |
//! |------------|--------|
//! | `observability.kernel.failed` | `observability` |
//! | `telemetry.span` | `observability` |
//! | `tool.invoke` | `business` |
//! | anything else | `business` |

use crate::config::RoutingConfig;
use kernbus_types::KernelId;

/// Prefixes routed to the observability kernel by default.
pub const DEFAULT_OBSERVABILITY_PREFIXES: [&str; 2] = ["observability.", "telemetry."];

/// Prefix-based routing between the business and observability kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
    observability_prefixes: Vec<String>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

impl RoutingPolicy {
    /// Routes types starting with any of `prefixes` to observability.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            observability_prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(config.observability_prefixes.iter().cloned())
    }

    /// Kernel that owns `event_type`.
    #[must_use]
    pub fn route(&self, event_type: &str) -> KernelId {
        if self
            .observability_prefixes
            .iter()
            .any(|prefix| event_type.starts_with(prefix.as_str()))
        {
            KernelId::observability()
        } else {
            KernelId::business()
        }
    }
}

/// Routes with the default prefixes.
#[must_use]
pub fn route_kernel(event_type: &str) -> KernelId {
    if DEFAULT_OBSERVABILITY_PREFIXES
        .iter()
        .any(|prefix| event_type.starts_with(prefix))
    {
        KernelId::observability()
    } else {
        KernelId::business()
    }
}
