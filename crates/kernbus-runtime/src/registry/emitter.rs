//! Emission handle for handlers.

use super::{KernelRegistry, RegistryError};
use crate::queue::Enqueued;
use kernbus_event::Event;
use std::sync::Weak;

/// Routes events through the registry that owns the emitting kernel.
///
/// Holds a weak reference: kernels hand emitters to handlers, and a strong
/// reference would keep the registry alive through its own kernels.
#[derive(Debug, Clone)]
pub struct Emitter {
    registry: Weak<KernelRegistry>,
}

impl Emitter {
    pub(crate) fn new(registry: Weak<KernelRegistry>) -> Self {
        Self { registry }
    }

    /// An emitter with no registry behind it. Every emit fails with
    /// [`RegistryError::Dropped`].
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            registry: Weak::new(),
        }
    }

    /// Routes and submits `event`, then schedules a drain.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Dropped`] if the registry is gone, otherwise
    /// see [`KernelRegistry::publish`].
    pub async fn emit(&self, event: Event) -> Result<Enqueued, RegistryError> {
        let registry = self.registry.upgrade().ok_or(RegistryError::Dropped)?;
        registry.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::ErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn detached_emitter_reports_dropped() {
        let event = Event::new("tool.invoke", "acme", json!({})).unwrap();
        let err = Emitter::detached().emit(event).await.unwrap_err();
        assert_eq!(err.code(), "REGISTRY_DROPPED");
    }
}
