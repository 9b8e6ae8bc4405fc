//! kernbus runtime: a multi-tenant, in-process event bus.
//!
//! Every tenant job gets its own pair of kernels. Each kernel owns a
//! priority queue, a dispatch table, quota accounting and loop protection,
//! and can be paused into a content-addressed snapshot and resumed later.
//! Request/response is layered on top of one-way events through
//! correlation ids.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Engine                     (one per process, explicit)     │
//! │    ├─ BusConfig, Persistor, ResourceProbe                   │
//! │    └─ Execution per tenant/job                              │
//! │         ├─ RequestRouter   request() → waiter + emit        │
//! │         └─ KernelRegistry  route, schedule, report faults   │
//! │              ├─ Kernel "business"                           │
//! │              └─ Kernel "observability"                      │
//! │                   ├─ EventQueue     dedup, backpressure     │
//! │                   ├─ DispatchTable  handlers, waiters       │
//! │                   └─ quotas, loop guard, context, snapshot  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! ## [`queue`] - EventQueue
//!
//! Priority ordering, duplicate suppression, retries with a dead-letter
//! store, and backpressure with hysteresis.
//!
//! ## [`kernel`] - Kernel
//!
//! Lifecycle (`idle → running ⇄ paused → completed | failed`), quotas,
//! loop protection, namespaced context and snapshots.
//!
//! ## [`dispatch`] - Handlers and Waiters
//!
//! [`EventHandler`](dispatch::EventHandler) registration and the one-shot
//! waiters used by the router.
//!
//! ## [`registry`] - KernelRegistry
//!
//! Routing by event type prefix, drain scheduling and kernel failure
//! notices.
//!
//! ## [`router`] - RequestRouter
//!
//! Request/response with deadlines and fail-fast on kernel faults.
//!
//! ## [`persist`] - Snapshot Storage
//!
//! [`Persistor`](persist::Persistor) with in-memory and document-store
//! backends.
//!
//! ## [`config`] - Configuration
//!
//! [`BusConfig`](config::BusConfig) and the layered
//! [`ConfigLoader`](config::ConfigLoader).
//!
//! Configuration priority: Environment > Project > Global > Default
//!
//! ## [`engine`] - Engine
//!
//! Execution map and background loops.
//!
//! # Example
//!
//! ```
//! use kernbus_runtime::testing::EchoResponder;
//! use kernbus_runtime::{BusConfig, Engine};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder(BusConfig::default()).build()?;
//! let execution = engine.execution("acme", "job-1")?;
//! execution.on("tool.invoke", Arc::new(EchoResponder::new("tool.response")));
//!
//! let reply = execution
//!     .request("tool.invoke", json!({"q": 1}), "tool.response", None)
//!     .await?;
//! assert_eq!(reply, json!({"q": 1}));
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod kernel;
pub mod persist;
pub mod queue;
pub mod registry;
pub mod router;
pub mod testing;

// Re-exports for convenience
pub use config::{
    default_config_dir, default_config_path, BackpressureConfig,
    BackpressurePolicy, BusConfig, ConfigError, ConfigLoader, KernelConfig, PersistorBackend,
    PersistorConfig, QueueConfig, RouterConfig, RoutingConfig, SchedulerConfig,
};
pub use dispatch::{handler_fn, EventHandler, HandlerContext, WaiterResult};
pub use engine::{Engine, EngineBuilder, EngineError, Execution};
pub use kernel::{
    ContextData, Kernel, KernelError, KernelFault, KernelSnapshotState, KernelStatus, QuotaLimit,
    Quotas, Snapshot,
};
pub use persist::{
    AppendOutcome, DocumentPersistor, MemoryPersistor, PersistError, Persistor,
};
pub use queue::{
    BackpressureGauge, DeadLetter, DeadLetterReason, DrainReport, Enqueued, EventQueue,
    NoPressure, PressureCause, QueueError, QueueMetrics, ResourceProbe, ResourceSignals,
};
pub use registry::{Emitter, KernelRegistry, RegistryError, RoutingPolicy, KERNEL_FAILED_EVENT};
pub use router::{PendingRequest, RequestError, RequestRouter};

// Contract types used across the runtime API
pub use kernbus_event::{ErrorPayload, Event, HandlerOutcome, Priority};
pub use kernbus_types::{
    CorrelationId, ErrorCode, EventId, ExecutionId, KernelId, SnapshotId, TenantId,
};
