//! The kernels of one execution and their scheduling.
//!
//! # Architecture
//!
//! ```text
//!                  KernelRegistry (one per execution)
//!                 ┌──────────────────────────────────────┐
//!   emit(event) ─►│ RoutingPolicy::route(event.type)     │
//!                 │        │                     │       │
//!                 │        ▼                     ▼       │
//!                 │  ┌──────────┐        ┌─────────────┐ │
//!                 │  │ business │        │observability│ │
//!                 │  │  Kernel  │        │   Kernel    │ │
//!                 │  └──────────┘        └─────────────┘ │
//!                 │        ▲                     ▲       │
//!                 │        └───── drain_all ─────┘       │
//!                 └──────────────────────────────────────┘
//! ```
//!
//! `drain_all` is the scheduling tick. Kernels drain in parallel, and a
//! kernel's own drain lock keeps two ticks from draining it at once.
//! [`KernelRegistry::schedule_drain`] coalesces triggers into one spawned
//! tick, so handlers can emit without waiting on the drain running them.

mod emitter;
mod error;
mod routing;

pub use emitter::Emitter;
pub use error::RegistryError;
pub use routing::{route_kernel, RoutingPolicy, DEFAULT_OBSERVABILITY_PREFIXES};

use crate::config::BusConfig;
use crate::dispatch::EventHandler;
use crate::kernel::{Kernel, KernelError};
use crate::persist::Persistor;
use crate::queue::{DrainReport, Enqueued, ResourceProbe};
use futures::future::join_all;
use kernbus_event::{Event, Priority};
use kernbus_types::{ExecutionId, KernelId};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Event emitted to the observability kernel when another kernel fails.
pub const KERNEL_FAILED_EVENT: &str = "observability.kernel.failed";

/// Business and observability kernels of one execution.
pub struct KernelRegistry {
    execution: ExecutionId,
    business: Arc<Kernel>,
    observability: Arc<Kernel>,
    routing: RoutingPolicy,
    batch_size: usize,
    drain_pending: AtomicBool,
    reported_failures: Mutex<BTreeSet<KernelId>>,
    this: Weak<KernelRegistry>,
}

impl KernelRegistry {
    /// Creates the registry with fresh, idle kernels.
    pub fn new(
        execution: ExecutionId,
        config: &BusConfig,
        persistor: Arc<dyn Persistor>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Arc<Self> {
        let kernel = |id: KernelId| {
            Arc::new(Kernel::new(
                id,
                execution.clone(),
                config,
                Arc::clone(&persistor),
                Arc::clone(&probe),
            ))
        };
        let business = kernel(KernelId::business());
        let observability = kernel(KernelId::observability());

        Arc::new_cyclic(|this| Self {
            execution,
            business,
            observability,
            routing: RoutingPolicy::from_config(&config.routing),
            batch_size: config.queue.batch_size,
            drain_pending: AtomicBool::new(false),
            reported_failures: Mutex::new(BTreeSet::new()),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution
    }

    #[must_use]
    pub fn routing(&self) -> &RoutingPolicy {
        &self.routing
    }

    /// Kernel that owns `event_type`.
    #[must_use]
    pub fn route_kernel(&self, event_type: &str) -> KernelId {
        self.routing.route(event_type)
    }

    #[must_use]
    pub fn kernel(&self, id: &KernelId) -> Option<&Arc<Kernel>> {
        self.kernels().find(|k| k.id() == id)
    }

    /// Kernel `id`, or [`RegistryError::UnknownKernel`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKernel`] if the id is not owned here.
    pub fn require(&self, id: &KernelId) -> Result<&Arc<Kernel>, RegistryError> {
        self.kernel(id)
            .ok_or_else(|| RegistryError::UnknownKernel(id.clone()))
    }

    #[must_use]
    pub fn business(&self) -> &Arc<Kernel> {
        &self.business
    }

    #[must_use]
    pub fn observability(&self) -> &Arc<Kernel> {
        &self.observability
    }

    pub fn kernels(&self) -> impl Iterator<Item = &Arc<Kernel>> {
        [&self.business, &self.observability].into_iter()
    }

    /// Emission handle bound to this registry.
    #[must_use]
    pub fn emitter(&self) -> Emitter {
        Emitter::new(self.this.clone())
    }

    // === Handlers ===

    /// Attaches `handler` for `event_type` on kernel `kernel_id`, returning
    /// the handler it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKernel`] for an id not owned here.
    pub fn register_handler(
        &self,
        kernel_id: &KernelId,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Option<Arc<dyn EventHandler>>, RegistryError> {
        Ok(self.require(kernel_id)?.register_handler(event_type, handler))
    }

    /// Attaches `handler` on the kernel `event_type` routes to.
    pub fn on(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        let event_type = event_type.into();
        let kernel = self.kernel_for(&event_type);
        kernel.register_handler(event_type, handler)
    }

    // === Emission ===

    /// Routes `event` to its kernel and submits it. Does not drain.
    ///
    /// A submission that fails its kernel also reports the failure to the
    /// observability kernel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Kernel`] if the kernel refuses the event.
    pub async fn emit(&self, event: Event) -> Result<Enqueued, RegistryError> {
        let kernel = Arc::clone(self.kernel_for(event.event_type()));
        match kernel.submit(Arc::new(event)).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if matches!(
                    e,
                    KernelError::QuotaExceeded { .. } | KernelError::LoopDetected { .. }
                ) {
                    self.report_failure(&kernel).await;
                }
                Err(e.into())
            }
        }
    }

    /// [`emit`](Self::emit) followed by [`schedule_drain`](Self::schedule_drain).
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub async fn publish(&self, event: Event) -> Result<Enqueued, RegistryError> {
        let outcome = self.emit(event).await?;
        if outcome.is_accepted() {
            self.schedule_drain();
        }
        Ok(outcome)
    }

    /// Fails kernel `kernel_id` and reports it. Returns `false` if it was
    /// already terminal.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKernel`] for an id not owned here.
    pub async fn fail_kernel(
        &self,
        kernel_id: &KernelId,
        reason: &str,
    ) -> Result<bool, RegistryError> {
        let kernel = Arc::clone(self.require(kernel_id)?);
        let failed = kernel.fail(reason);
        if failed {
            self.report_failure(&kernel).await;
        }
        Ok(failed)
    }

    // === Scheduling ===

    /// Drains every kernel once, in parallel.
    pub async fn drain_all(&self, batch_size: usize) -> DrainReport {
        let emitter = self.emitter();
        let reports = join_all(self.kernels().map(|k| k.drain(batch_size, &emitter))).await;

        let mut total = DrainReport::default();
        for report in reports {
            total.merge(report);
        }

        // handlers may fail their own kernel directly
        for kernel in [&self.business, &self.observability] {
            if kernel.fault().is_some() {
                self.report_failure(kernel).await;
            }
        }
        total
    }

    /// Spawns a drain tick unless one is already pending. Returns `false`
    /// when coalesced or outside a Tokio runtime.
    pub fn schedule_drain(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(execution = %self.execution, "No runtime, drain left to the scheduler");
            return false;
        };
        if self.drain_pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.this.upgrade() else {
            self.drain_pending.store(false, Ordering::Release);
            return false;
        };

        handle.spawn(async move {
            loop {
                // triggers after this point spawn (or re-run) a new tick
                registry.drain_pending.store(false, Ordering::Release);
                let report = registry.drain_all(registry.batch_size).await;
                if report.is_idle() || !registry.has_ready_work() {
                    break;
                }
            }
        });
        true
    }

    /// Whether any dispatching kernel has queued events.
    #[must_use]
    pub fn has_ready_work(&self) -> bool {
        self.kernels().any(|k| {
            matches!(
                k.status(),
                crate::kernel::KernelStatus::Idle | crate::kernel::KernelStatus::Running
            ) && k.queue().depth() > 0
        })
    }

    /// Configured drain batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    // === Waiters ===

    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.kernels().map(|k| k.waiter_count()).sum()
    }

    /// Drops expired waiters on every kernel.
    pub fn reap_expired_waiters(&self, now: Instant) -> usize {
        self.kernels().map(|k| k.reap_expired_waiters(now)).sum()
    }

    /// Drops every waiter without resolving it.
    pub fn close(&self) -> usize {
        self.kernels().map(|k| k.close_waiters()).sum()
    }

    /// Whether the business kernel reached a terminal status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.business.is_terminal()
    }

    // === Internals ===

    fn kernel_for(&self, event_type: &str) -> &Arc<Kernel> {
        if self.routing.route(event_type).is_observability() {
            &self.observability
        } else {
            &self.business
        }
    }

    /// Emits [`KERNEL_FAILED_EVENT`] once per failed kernel.
    async fn report_failure(&self, kernel: &Kernel) {
        let Some(fault) = kernel.fault() else {
            return;
        };
        if kernel.id().is_observability() {
            return;
        }
        if !self.reported_failures.lock().insert(kernel.id().clone()) {
            return;
        }

        let notice = Event::builder(KERNEL_FAILED_EVENT, self.execution.tenant().clone())
            .priority(Priority::HIGH)
            .data(json!({
                "kernel": kernel.id(),
                "execution": self.execution,
                "fault": fault,
            }))
            .build();

        let submitted = match notice {
            Ok(event) => self.observability.submit(Arc::new(event)).await.map_err(RegistryError::from),
            Err(e) => Err(e.into()),
        };
        match submitted {
            Ok(_) => {
                self.schedule_drain();
            }
            Err(e) => {
                warn!(kernel = %kernel.id(), error = %e, "Could not report kernel failure");
            }
        }
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("execution", &self.execution)
            .field("business", &self.business)
            .field("observability", &self.observability)
            .field("routing", &self.routing)
            .finish()
    }
}
