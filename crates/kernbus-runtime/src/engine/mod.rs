//! Engine: the explicit context object of a bus instance.
//!
//! The [`Engine`] owns everything process-wide: the configuration, the
//! shared [`Persistor`] and the map of live [`Execution`]s. Nothing in the
//! crate reaches for globals; two engines in one process are independent.
//!
//! # Background Loops
//!
//! ```text
//! start()
//!   ├─ tick  every scheduler.tick_interval_ms
//!   │    └─ drain_all on every execution
//!   │       └─ evict finished executions (scheduler.evict_terminal)
//!   └─ sweep every router.sweep_interval_ms
//!        └─ reap expired waiters and pending requests
//!
//! shutdown()
//!   ├─ stop both loops
//!   └─ close every router (waiting requests fail with Shutdown)
//! ```
//!
//! Emissions already schedule their own drain, so the tick only picks up
//! work left behind: events queued while no runtime was available, events
//! released by a resume, and retries.
//!
//! # Example
//!
//! ```
//! use kernbus_runtime::{BusConfig, Engine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), kernbus_runtime::EngineError> {
//! let engine = Engine::builder(BusConfig::default()).build()?;
//! let execution = engine.execution("acme", "job-1")?;
//! assert_eq!(execution.id().to_string(), "acme/job-1");
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod execution;

pub use error::EngineError;
pub use execution::Execution;

use crate::config::BusConfig;
use crate::kernel::Snapshot;
use crate::persist::{self, Persistor};
use crate::queue::{DrainReport, NoPressure, ResourceProbe};
use futures::future::join_all;
use kernbus_types::{ExecutionId, TenantId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Builder for [`Engine`].
#[derive(Debug)]
pub struct EngineBuilder {
    config: BusConfig,
    persistor: Option<Arc<dyn Persistor>>,
    probe: Option<Arc<dyn ResourceProbe>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            persistor: None,
            probe: None,
        }
    }

    /// Uses `persistor` instead of the backend named in the config.
    #[must_use]
    pub fn with_persistor(mut self, persistor: Arc<dyn Persistor>) -> Self {
        self.persistor = Some(persistor);
        self
    }

    /// Resource signal source for backpressure. Defaults to [`NoPressure`].
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Validates the config and opens the persistor.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] if the config is inconsistent
    /// - [`EngineError::Persist`] if the configured backend cannot open
    pub fn build(self) -> Result<Arc<Engine>, EngineError> {
        self.config.validate()?;
        let persistor = match self.persistor {
            Some(persistor) => persistor,
            None => persist::from_config(&self.config.persistor)?,
        };
        let probe = self.probe.unwrap_or_else(|| Arc::new(NoPressure));
        let (shutdown_tx, _) = watch::channel(false);

        debug!(backend = %persistor.backend(), "Engine built");
        Ok(Arc::new(Engine {
            config: self.config,
            persistor,
            probe,
            executions: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Process-level owner of executions and background loops.
pub struct Engine {
    config: BusConfig,
    persistor: Arc<dyn Persistor>,
    probe: Arc<dyn ResourceProbe>,
    executions: RwLock<HashMap<ExecutionId, Arc<Execution>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    #[must_use]
    pub fn builder(config: BusConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn persistor(&self) -> &Arc<dyn Persistor> {
        &self.persistor
    }

    // === Executions ===

    /// Returns the execution for `tenant`/`job`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn execution(
        &self,
        tenant: impl Into<TenantId>,
        job: impl Into<String>,
    ) -> Result<Arc<Execution>, EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        let id = ExecutionId::new(tenant, job);
        if let Some(execution) = self.executions.read().get(&id) {
            return Ok(Arc::clone(execution));
        }

        let mut executions = self.executions.write();
        let execution = executions.entry(id.clone()).or_insert_with(|| {
            debug!(execution = %id, "Execution created");
            Arc::new(Execution::new(
                id.clone(),
                &self.config,
                Arc::clone(&self.persistor),
                Arc::clone(&self.probe),
            ))
        });
        Ok(Arc::clone(execution))
    }

    #[must_use]
    pub fn get(&self, id: &ExecutionId) -> Option<Arc<Execution>> {
        self.executions.read().get(id).cloned()
    }

    /// Live execution ids, sorted.
    #[must_use]
    pub fn execution_ids(&self) -> Vec<ExecutionId> {
        let mut ids: Vec<ExecutionId> = self.executions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.read().is_empty()
    }

    /// Removes an execution and closes its router.
    pub fn evict(&self, id: &ExecutionId) -> Option<Arc<Execution>> {
        let removed = self.executions.write().remove(id);
        if let Some(execution) = &removed {
            execution.close();
            info!(execution = %id, "Execution evicted");
        }
        removed
    }

    /// Evicts every execution of `tenant`. Returns how many were removed.
    pub fn cleanup_tenant(&self, tenant: &TenantId) -> usize {
        let removed: Vec<Arc<Execution>> = {
            let mut executions = self.executions.write();
            let ids: Vec<ExecutionId> = executions
                .keys()
                .filter(|id| id.tenant() == tenant)
                .cloned()
                .collect();
            ids.iter().filter_map(|id| executions.remove(id)).collect()
        };
        for execution in &removed {
            execution.close();
        }
        if !removed.is_empty() {
            info!(tenant = %tenant, executions = removed.len(), "Tenant cleaned up");
        }
        removed.len()
    }

    /// Persisted snapshots of `id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] if the backend cannot be read.
    pub async fn snapshots(&self, id: &ExecutionId) -> Result<Vec<Snapshot>, EngineError> {
        Ok(self.persistor.load(id).await?)
    }

    // === Scheduling ===

    /// Drains every execution once, then evicts executions whose business
    /// kernel is terminal unless `scheduler.evict_terminal` is off.
    pub async fn tick(&self) -> DrainReport {
        let executions = self.live();
        let batch_size = self.config.queue.batch_size;
        let reports = join_all(
            executions
                .iter()
                .map(|e| e.registry().drain_all(batch_size)),
        )
        .await;

        let mut total = DrainReport::default();
        for report in reports {
            total.merge(report);
        }

        if self.config.scheduler.evict_terminal {
            for execution in executions.iter().filter(|e| e.is_finished()) {
                self.evict(execution.id());
            }
        }
        total
    }

    /// Reaps expired waiters across executions. Returns how many were
    /// dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        self.live()
            .iter()
            .map(|e| e.router().sweep_expired(now))
            .sum()
    }

    // === Lifecycle ===

    /// Spawns the tick and sweep loops on the current runtime.
    ///
    /// The loops hold a weak reference and stop when the engine is dropped
    /// or shut down.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ShutDown`] after [`shutdown`](Self::shutdown)
    /// - [`EngineError::NoRuntime`] outside a Tokio runtime
    /// - [`EngineError::AlreadyStarted`] on a second call
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(EngineError::AlreadyStarted);
        }

        let tick = Duration::from_millis(self.config.scheduler.tick_interval_ms);
        let sweep = Duration::from_millis(self.config.router.sweep_interval_ms);
        tasks.push(self.spawn_loop(&handle, "tick", tick, |engine| async move {
            engine.tick().await;
        }));
        tasks.push(self.spawn_loop(&handle, "sweep", sweep, |engine| async move {
            engine.sweep(Instant::now());
        }));

        info!(
            tick_ms = self.config.scheduler.tick_interval_ms,
            sweep_ms = self.config.router.sweep_interval_ms,
            "Engine started"
        );
        Ok(())
    }

    /// Stops the background loops and closes every router. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let executions = self.live();
        for execution in &executions {
            execution.close();
        }
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "Engine loop panicked");
                }
            }
        }
        info!(executions = executions.len(), "Engine shut down");
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    // === Internals ===

    fn live(&self) -> Vec<Arc<Execution>> {
        self.executions.read().values().cloned().collect()
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        handle: &tokio::runtime::Handle,
        name: &'static str,
        period: Duration,
        step: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Engine>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::downgrade(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        // sender gone means the engine was dropped
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(engine) = engine.upgrade() else { break };
                        step(engine).await;
                    }
                }
            }
            debug!(task = name, "Engine loop stopped");
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("executions", &self.execution_ids())
            .field("persistor", &self.persistor.backend())
            .field("started", &self.is_started())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
