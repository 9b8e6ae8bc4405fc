//! One tenant's job: its kernels plus a request router.

use crate::config::BusConfig;
use crate::dispatch::EventHandler;
use crate::kernel::{Kernel, KernelError};
use crate::persist::Persistor;
use crate::queue::{Enqueued, ResourceProbe};
use crate::registry::{KernelRegistry, RegistryError};
use crate::router::{RequestError, RequestRouter};
use kernbus_event::Event;
use kernbus_types::{ExecutionId, SnapshotId, TenantId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A tenant/job pair with its own [`KernelRegistry`] and
/// [`RequestRouter`].
///
/// Nothing is shared with other executions except the persistor and the
/// resource probe.
#[derive(Debug)]
pub struct Execution {
    id: ExecutionId,
    registry: Arc<KernelRegistry>,
    router: RequestRouter,
}

impl Execution {
    pub(crate) fn new(
        id: ExecutionId,
        config: &BusConfig,
        persistor: Arc<dyn Persistor>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let registry = KernelRegistry::new(id.clone(), config, persistor, probe);
        let router = RequestRouter::new(Arc::clone(&registry), &config.router);
        Self {
            id,
            registry,
            router,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        self.id.tenant()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// The business kernel, which owns this execution's lifecycle.
    #[must_use]
    pub fn business(&self) -> &Arc<Kernel> {
        self.registry.business()
    }

    /// Attaches `handler` on the kernel `event_type` routes to.
    pub fn on(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.registry.on(event_type, handler)
    }

    /// Emits `event` and schedules a drain.
    ///
    /// # Errors
    ///
    /// See [`KernelRegistry::publish`].
    pub async fn publish(&self, event: Event) -> Result<Enqueued, RegistryError> {
        self.registry.publish(event).await
    }

    /// Builds an event for this execution's tenant and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Event`] for an invalid event type, otherwise
    /// see [`KernelRegistry::publish`].
    pub async fn emit(&self, event_type: &str, data: Value) -> Result<Enqueued, RegistryError> {
        let event = Event::new(event_type, self.id.tenant().clone(), data)?;
        self.publish(event).await
    }

    /// See [`RequestRouter::request`].
    ///
    /// # Errors
    ///
    /// See [`RequestRouter::request`].
    pub async fn request(
        &self,
        request_type: &str,
        data: Value,
        response_type: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        self.router
            .request(request_type, data, response_type, timeout)
            .await
    }

    /// Pauses the business kernel and persists its snapshot.
    ///
    /// # Errors
    ///
    /// See [`Kernel::pause`].
    pub async fn pause(&self, reason: &str) -> Result<SnapshotId, KernelError> {
        self.registry.business().pause(reason).await
    }

    /// Restores the business kernel from `snapshot_id` and schedules a
    /// drain for the events that queued while paused.
    ///
    /// # Errors
    ///
    /// See [`Kernel::resume`].
    pub async fn resume(&self, snapshot_id: &SnapshotId) -> Result<(), KernelError> {
        self.registry.business().resume(snapshot_id).await?;
        self.registry.schedule_drain();
        Ok(())
    }

    /// Whether the business kernel reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.registry.is_finished()
    }

    /// Closes the router, failing outstanding requests with
    /// [`RequestError::Shutdown`].
    pub fn close(&self) {
        self.router.close();
    }
}
