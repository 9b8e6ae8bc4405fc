//! Kernels: per-execution state, quotas and the event queue.
//!
//! A [`Kernel`] owns everything one tenant/job execution mutates: namespaced
//! context, quota counters, loop-protection windows, its [`EventQueue`] and
//! its [`DispatchTable`]. Nothing outside the kernel writes this state;
//! handlers reach it only through the kernel reference in their
//! [`HandlerContext`].
//!
//! # Lifecycle
//!
//! ```text
//!     submit / start / resume
//!   Idle ─────────────────► Running ◄──── resume ────┐
//!                             │                      │
//!                             │ pause                │
//!                             └─────► Paused ────────┘
//!                                       │
//!   quota / loop / fail / complete (from any non-terminal status)
//!                                       ▼
//!                               Completed | Failed
//! ```
//!
//! # Failure side effects
//!
//! Entering `Failed` (quota, loop, or [`Kernel::fail`]):
//!
//! 1. queued events are dead-lettered with reason `kernel_halted`;
//! 2. every one-shot waiter on this kernel resolves with the fault;
//! 3. later submissions and waiter registrations are refused.
//!
//! # Durability
//!
//! Context writes are in-memory only. State becomes durable when
//! [`Kernel::pause`] appends a content-addressed [`Snapshot`] through the
//! shared [`Persistor`].

mod context;
mod error;
mod loop_guard;
mod quota;
mod snapshot;
mod state;

pub use context::ContextData;
pub use error::KernelError;
pub use loop_guard::LoopProtection;
pub use quota::{QuotaLimit, Quotas};
pub use snapshot::{KernelSnapshotState, Snapshot, SNAPSHOT_VERSION};
pub use state::{KernelFault, KernelStatus};

use crate::config::BusConfig;
use crate::dispatch::{DispatchTable, EventHandler, HandlerContext, WaiterResult};
use crate::persist::Persistor;
use crate::queue::{
    DeadLetter, Delivery, Dispatch, DrainReport, Enqueued, EventQueue, Gate, QueueMetrics,
    ResourceProbe,
};
use crate::registry::Emitter;
use async_trait::async_trait;
use kernbus_event::{Event, HandlerOutcome};
use kernbus_types::{CorrelationId, ExecutionId, KernelId, SnapshotId, TenantId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wall-clock epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug)]
struct KernelState {
    status: KernelStatus,
    fault: Option<KernelFault>,
    context: ContextData,
    quotas: Quotas,
    loop_protection: LoopProtection,
    last_snapshot: Option<SnapshotId>,
}

/// Authoritative state and control surface of one execution.
///
/// Synchronous operations take a short `parking_lot` lock that is never
/// held across an await. Drains of one kernel are serialized; drains of
/// different kernels run in parallel.
pub struct Kernel {
    id: KernelId,
    execution: ExecutionId,
    label: String,
    state: Mutex<KernelState>,
    status_tx: watch::Sender<KernelStatus>,
    queue: EventQueue,
    dispatch: DispatchTable,
    persistor: Arc<dyn Persistor>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl Kernel {
    /// Creates an idle kernel.
    pub fn new(
        id: KernelId,
        execution: ExecutionId,
        config: &BusConfig,
        persistor: Arc<dyn Persistor>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let label = format!("{execution}/{id}");
        let (status_tx, _) = watch::channel(KernelStatus::Idle);
        Self {
            queue: EventQueue::new(
                label.clone(),
                config.queue.clone(),
                config.backpressure.clone(),
                probe,
            ),
            state: Mutex::new(KernelState {
                status: KernelStatus::Idle,
                fault: None,
                context: ContextData::new(),
                quotas: Quotas::new(config.kernel.max_events, config.kernel.max_duration_ms),
                loop_protection: LoopProtection::new(
                    config.kernel.loop_window_ms,
                    config.kernel.loop_max_events,
                ),
                last_snapshot: None,
            }),
            id,
            execution,
            label,
            status_tx,
            dispatch: DispatchTable::new(),
            persistor,
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &KernelId {
        &self.id
    }

    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        self.execution.tenant()
    }

    #[must_use]
    pub fn status(&self) -> KernelStatus {
        self.state.lock().status
    }

    /// Why the kernel failed, if it did.
    #[must_use]
    pub fn fault(&self) -> Option<KernelFault> {
        self.state.lock().fault.clone()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Moves an idle kernel to running. Running kernels are left as is.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTransition`] from any other status.
    pub fn start(&self) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        match state.status {
            KernelStatus::Running => Ok(()),
            KernelStatus::Idle => {
                self.begin_running(&mut state, now_ms());
                Ok(())
            }
            from => Err(KernelError::InvalidTransition {
                from,
                to: KernelStatus::Running,
            }),
        }
    }

    // === Context ===

    /// Sets `namespace.key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Halted`] once the kernel is terminal.
    pub fn set_context(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<Option<Value>, KernelError> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(state.context.set(namespace, key, value))
    }

    #[must_use]
    pub fn get_context(&self, namespace: &str, key: &str) -> Option<Value> {
        self.state.lock().context.get(namespace, key).cloned()
    }

    /// Removes `namespace.key`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Halted`] once the kernel is terminal.
    pub fn remove_context(&self, namespace: &str, key: &str) -> Result<Option<Value>, KernelError> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        Ok(state.context.remove(namespace, key))
    }

    /// Copy of the whole context.
    #[must_use]
    pub fn context(&self) -> ContextData {
        self.state.lock().context.clone()
    }

    // === Accounting ===

    /// Counts `event` against the quotas. An idle kernel starts running.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QuotaExceeded`] when this event crosses a
    /// limit; the kernel is `Failed` by the time the error is returned.
    pub fn record_event(&self, event: &Event) -> Result<(), KernelError> {
        let now = now_ms();
        let fault = {
            let mut state = self.state.lock();
            self.ensure_live(&state)?;
            if state.status == KernelStatus::Idle {
                self.begin_running(&mut state, now);
            }
            match state.quotas.record(now) {
                Ok(()) => return Ok(()),
                Err(limit) => KernelFault::QuotaExceeded { limit },
            }
        };
        debug!(kernel = %self.label, event_type = event.event_type(), "Quota crossed");
        self.halt(fault.clone());
        Err(KernelError::from_fault(&self.id, &fault))
    }

    /// Records one `event_type` in the loop-protection window.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::LoopDetected`] when the window overflows; the
    /// kernel is `Failed` by the time the error is returned.
    pub fn check_loop_protection(&self, event_type: &str) -> Result<(), KernelError> {
        let fault = {
            let mut state = self.state.lock();
            self.ensure_live(&state)?;
            match state.loop_protection.check(event_type, now_ms()) {
                Ok(()) => return Ok(()),
                Err(fault) => fault,
            }
        };
        self.halt(fault.clone());
        Err(KernelError::from_fault(&self.id, &fault))
    }

    // === Submission ===

    /// Enqueues `event` and accounts for it.
    ///
    /// Only events stamped with this kernel's tenant are accepted.
    /// Duplicates are not counted. A submission that trips a quota or the
    /// loop guard is dead-lettered together with the rest of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::TenantMismatch`] for another tenant's event,
    /// [`KernelError::Halted`] for a terminal kernel,
    /// [`KernelError::Queue`] under backpressure, or the quota/loop error
    /// this event tripped.
    pub async fn submit(&self, event: Arc<Event>) -> Result<Enqueued, KernelError> {
        if event.tenant_id() != self.tenant_id() {
            warn!(
                kernel = %self.label,
                event_id = %event.id(),
                tenant = %event.tenant_id(),
                "Event for another tenant refused"
            );
            return Err(KernelError::TenantMismatch {
                kernel: self.id.clone(),
                expected: self.tenant_id().clone(),
                actual: event.tenant_id().clone(),
            });
        }
        self.ensure_accepting()?;
        let outcome = self.queue.enqueue(Arc::clone(&event)).await?;
        if !outcome.is_accepted() {
            debug!(kernel = %self.label, event_id = %event.id(), "Duplicate event dropped");
            return Ok(outcome);
        }

        let accounted = self
            .record_event(&event)
            .and_then(|()| self.check_loop_protection(event.event_type()));
        if let Err(e) = accounted {
            // a concurrent halt may have flushed before this enqueue landed
            self.flush_if_terminal();
            return Err(e);
        }
        Ok(outcome)
    }

    // === Termination ===

    /// Fails the kernel with `fault`. Returns `false` if it was already
    /// terminal.
    pub fn halt(&self, fault: KernelFault) -> bool {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.quotas.suspend(now_ms());
            state.status = KernelStatus::Failed;
            state.fault = Some(fault.clone());
            self.status_tx.send_replace(KernelStatus::Failed);
        }

        let waiters = self.dispatch.fail_waiters(&fault);
        let flushed = self.queue.flush_to_dead_letters(&fault.to_string());
        warn!(
            kernel = %self.label,
            fault = %fault,
            waiters,
            flushed,
            "Kernel failed"
        );
        true
    }

    /// Fails the kernel explicitly.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.halt(KernelFault::Failed {
            reason: reason.into(),
        })
    }

    /// Finishes the kernel normally. Outstanding waiters are dropped and
    /// queued events dead-lettered.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTransition`] if already terminal.
    pub fn complete(&self) -> Result<(), KernelError> {
        {
            let mut state = self.state.lock();
            self.transition(&mut state, KernelStatus::Completed)?;
            state.quotas.suspend(now_ms());
        }
        let waiters = self.dispatch.clear_waiters();
        let flushed = self.queue.flush_to_dead_letters("kernel completed");
        info!(kernel = %self.label, waiters, flushed, "Kernel completed");
        Ok(())
    }

    /// Resolves once the kernel is terminal, with the terminal status.
    pub async fn terminated(&self) -> KernelStatus {
        let mut rx = self.status_tx.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    // === Pause / Resume ===

    /// Snapshots the kernel state, persists it and pauses the kernel.
    ///
    /// The kernel stops dispatching as soon as the snapshot is taken. If
    /// the append fails the previous status is restored.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTransition`] unless running, and
    /// [`KernelError::Persist`] if the append fails.
    pub async fn pause(&self, reason: &str) -> Result<SnapshotId, KernelError> {
        let now = now_ms();
        let (snapshot, previous) = {
            let mut state = self.state.lock();
            let previous = state.status;
            if !previous.can_transition_to(KernelStatus::Paused) {
                return Err(self.transition_error(&state, KernelStatus::Paused));
            }

            let mut quotas = state.quotas.clone();
            quotas.suspend(now);
            state.loop_protection.prune(now);
            let snapshot = Snapshot::capture(
                self.execution.clone(),
                KernelSnapshotState {
                    version: SNAPSHOT_VERSION,
                    kernel_id: self.id.clone(),
                    tenant_id: self.tenant_id().clone(),
                    context: state.context.clone(),
                    quotas: quotas.clone(),
                    loop_protection: state.loop_protection.clone(),
                },
                now,
                Some(reason.to_string()),
            )?;

            state.quotas = quotas;
            state.status = KernelStatus::Paused;
            self.status_tx.send_replace(KernelStatus::Paused);
            (snapshot, previous)
        };

        let hash = snapshot.content_hash.clone();
        match self.persistor.append(&snapshot).await {
            Ok(outcome) => {
                self.state.lock().last_snapshot = Some(hash.clone());
                info!(kernel = %self.label, snapshot = %hash, ?outcome, reason, "Kernel paused");
                Ok(hash)
            }
            Err(e) => {
                let mut state = self.state.lock();
                if state.status == KernelStatus::Paused {
                    state.status = previous;
                    state.quotas.begin(now_ms());
                    self.status_tx.send_replace(previous);
                }
                warn!(kernel = %self.label, error = %e, "Snapshot append failed, pause reverted");
                Err(e.into())
            }
        }
    }

    /// Restores state from a persisted snapshot and runs the kernel.
    ///
    /// Accepts an idle kernel (a fresh instance picking up an execution) or
    /// a paused one. Nothing is mutated unless the snapshot loads,
    /// belongs to this execution and kernel, and passes its integrity check.
    ///
    /// # Errors
    ///
    /// - [`KernelError::SnapshotNotFound`] for an unknown id
    /// - [`KernelError::SnapshotMismatch`] for another execution or kernel
    /// - [`KernelError::SnapshotCorrupted`] if content and hash disagree
    /// - [`KernelError::InvalidTransition`] unless idle or paused
    pub async fn resume(&self, snapshot_id: &SnapshotId) -> Result<(), KernelError> {
        {
            let state = self.state.lock();
            self.ensure_resumable(&state)?;
        }

        let snapshot = self
            .persistor
            .get_by_hash(snapshot_id)
            .await?
            .ok_or_else(|| KernelError::SnapshotNotFound(snapshot_id.clone()))?;
        snapshot.validate(&self.execution, &self.id)?;
        if &snapshot.content_hash != snapshot_id || !snapshot.verify()? {
            return Err(KernelError::SnapshotCorrupted(snapshot_id.clone()));
        }

        {
            let mut state = self.state.lock();
            self.ensure_resumable(&state)?;
            let restored = snapshot.state;
            state.context = restored.context;
            state.quotas = restored.quotas;
            state.quotas.running_since = None;
            state.loop_protection = restored.loop_protection;
            state.last_snapshot = Some(snapshot_id.clone());
            self.begin_running(&mut state, now_ms());
        }
        info!(kernel = %self.label, snapshot = %snapshot_id, "Kernel resumed");
        Ok(())
    }

    /// Current serializable state, as a snapshot would capture it.
    #[must_use]
    pub fn snapshot_state(&self) -> KernelSnapshotState {
        let state = self.state.lock();
        KernelSnapshotState {
            version: SNAPSHOT_VERSION,
            kernel_id: self.id.clone(),
            tenant_id: self.tenant_id().clone(),
            context: state.context.clone(),
            quotas: state.quotas.clone(),
            loop_protection: state.loop_protection.clone(),
        }
    }

    /// Hash of the last snapshot taken or resumed from.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<SnapshotId> {
        self.state.lock().last_snapshot.clone()
    }

    #[must_use]
    pub fn quotas(&self) -> Quotas {
        self.state.lock().quotas.clone()
    }

    // === Dispatch ===

    /// Drains up to `batch_size` events through this kernel's handlers and
    /// waiters. Concurrent calls on one kernel run one after another.
    pub async fn drain(self: &Arc<Self>, batch_size: usize, emitter: &Emitter) -> DrainReport {
        let _drain = self.drain_lock.lock().await;
        if self.status() == KernelStatus::Paused {
            return DrainReport::default();
        }

        let dispatcher = KernelDispatcher {
            kernel: Arc::clone(self),
            emitter: emitter.clone(),
        };
        let report = self.queue.drain(batch_size, &dispatcher).await;
        self.flush_if_terminal();
        report
    }

    /// Registers `handler` for `event_type`, replacing any previous one.
    pub fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.dispatch.register_handler(event_type, handler)
    }

    #[must_use]
    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    /// Registers a one-shot waiter for the `event_type` event carrying
    /// `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns the kernel's fault (or [`KernelError::Halted`]) if terminal,
    /// and [`KernelError::DuplicateWaiter`] if the key is taken.
    pub fn register_waiter(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<WaiterResult>, KernelError> {
        // status check and insert under one lock, so a concurrent halt
        // either refuses this waiter or fails it
        let state = self.state.lock();
        if state.status.is_terminal() {
            return Err(self.halted_error(&state));
        }
        self.dispatch
            .register_waiter(event_type, correlation_id, deadline)
            .ok_or_else(|| KernelError::DuplicateWaiter {
                event_type: event_type.to_string(),
                correlation_id,
            })
    }

    /// Removes a waiter. Returns `false` if it already resolved.
    pub fn remove_waiter(&self, event_type: &str, correlation_id: CorrelationId) -> bool {
        self.dispatch.remove_waiter(event_type, correlation_id)
    }

    /// Drops waiters whose deadline passed. Returns how many.
    pub fn reap_expired_waiters(&self, now: Instant) -> usize {
        let reaped = self.dispatch.reap_expired_waiters(now);
        if reaped > 0 {
            debug!(kernel = %self.label, reaped, "Reaped expired waiters");
        }
        reaped
    }

    /// Drops all waiters without resolving them.
    pub fn close_waiters(&self) -> usize {
        self.dispatch.clear_waiters()
    }

    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.dispatch.waiter_count()
    }

    #[must_use]
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        self.queue.metrics()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    // === Internals ===

    fn begin_running(&self, state: &mut KernelState, now: i64) {
        state.quotas.begin(now);
        state.status = KernelStatus::Running;
        self.status_tx.send_replace(KernelStatus::Running);
    }

    fn transition(&self, state: &mut KernelState, to: KernelStatus) -> Result<(), KernelError> {
        if !state.status.can_transition_to(to) {
            return Err(self.transition_error(state, to));
        }
        state.status = to;
        self.status_tx.send_replace(to);
        Ok(())
    }

    fn transition_error(&self, state: &KernelState, to: KernelStatus) -> KernelError {
        if state.status.is_terminal() {
            self.halted_error(state)
        } else {
            KernelError::InvalidTransition {
                from: state.status,
                to,
            }
        }
    }

    fn halted_error(&self, state: &KernelState) -> KernelError {
        match &state.fault {
            Some(fault) => KernelError::from_fault(&self.id, fault),
            None => KernelError::Halted {
                kernel: self.id.clone(),
                status: state.status,
                fault: None,
            },
        }
    }

    fn ensure_live(&self, state: &KernelState) -> Result<(), KernelError> {
        if state.status.is_terminal() {
            return Err(KernelError::Halted {
                kernel: self.id.clone(),
                status: state.status,
                fault: state.fault.clone(),
            });
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<(), KernelError> {
        let state = self.state.lock();
        if state.status.is_terminal() {
            return Err(self.halted_error(&state));
        }
        Ok(())
    }

    fn ensure_resumable(&self, state: &KernelState) -> Result<(), KernelError> {
        match state.status {
            KernelStatus::Idle | KernelStatus::Paused => Ok(()),
            _ => Err(self.transition_error(state, KernelStatus::Running)),
        }
    }

    fn halt_reason(&self) -> Option<String> {
        let state = self.state.lock();
        match state.status {
            KernelStatus::Failed => Some(
                state
                    .fault
                    .as_ref()
                    .map_or_else(|| "kernel failed".to_string(), ToString::to_string),
            ),
            KernelStatus::Completed => Some("kernel completed".to_string()),
            _ => None,
        }
    }

    fn flush_if_terminal(&self) {
        if let Some(reason) = self.halt_reason() {
            self.queue.flush_to_dead_letters(&reason);
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.id)
            .field("execution", &self.execution)
            .field("status", &self.status())
            .field("depth", &self.queue.depth())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

/// Connects a kernel's queue to its dispatch table.
struct KernelDispatcher {
    kernel: Arc<Kernel>,
    emitter: Emitter,
}

#[async_trait]
impl Dispatch for KernelDispatcher {
    fn gate(&self) -> Gate {
        match self.kernel.status() {
            KernelStatus::Idle | KernelStatus::Running => Gate::Open,
            KernelStatus::Paused => Gate::Paused,
            KernelStatus::Completed | KernelStatus::Failed => Gate::Halted(
                self.kernel
                    .halt_reason()
                    .unwrap_or_else(|| "kernel halted".to_string()),
            ),
        }
    }

    async fn dispatch(&self, event: Arc<Event>, attempt: u32) -> Delivery {
        let kernel = &self.kernel;

        if let Some(correlation_id) = event.correlation_id() {
            if let Some(tx) = kernel.dispatch.take_waiter(event.event_type(), correlation_id) {
                if tx.send(Ok(Arc::clone(&event))).is_err() {
                    debug!(
                        kernel = %kernel.label,
                        correlation_id = %correlation_id,
                        "Waiter gone before response arrived"
                    );
                }
                return Delivery::Handled(HandlerOutcome::Ack);
            }
        }

        match kernel.dispatch.handler(event.event_type()) {
            Some(handler) => {
                let ctx = HandlerContext::new(Arc::clone(kernel), self.emitter.clone(), attempt);
                Delivery::Handled(handler.handle(event, ctx).await)
            }
            None => Delivery::NoHandler,
        }
    }
}
