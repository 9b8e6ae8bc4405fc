//! Event handlers.

use crate::kernel::Kernel;
use crate::queue::Enqueued;
use crate::registry::{Emitter, RegistryError};
use async_trait::async_trait;
use kernbus_event::{ErrorPayload, Event, HandlerOutcome};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Processes events of one type on one kernel.
///
/// Handlers run concurrently within a drain chunk, so implementations must
/// not assume exclusive access to shared state.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use kernbus_event::{Event, HandlerOutcome};
/// use kernbus_runtime::dispatch::{EventHandler, HandlerContext};
/// use std::sync::Arc;
///
/// struct Audit;
///
/// #[async_trait]
/// impl EventHandler for Audit {
///     async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome {
///         let seen = ctx.kernel().get_context("audit", "count")
///             .and_then(|v| v.as_u64())
///             .unwrap_or(0);
///         match ctx.kernel().set_context("audit", "count", (seen + 1).into()) {
///             Ok(_) => HandlerOutcome::Ack,
///             Err(e) => HandlerOutcome::fatal(e.to_string()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivery of `event`.
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
{
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome {
        (self.0)(event, ctx).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// ```
/// use kernbus_event::HandlerOutcome;
/// use kernbus_runtime::dispatch::handler_fn;
///
/// let handler = handler_fn(|_event, _ctx| async { HandlerOutcome::Ack });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// What a handler can reach while processing an event.
#[derive(Clone)]
pub struct HandlerContext {
    kernel: Arc<Kernel>,
    emitter: Emitter,
    attempt: u32,
}

impl HandlerContext {
    pub(crate) fn new(kernel: Arc<Kernel>, emitter: Emitter, attempt: u32) -> Self {
        Self {
            kernel,
            emitter,
            attempt,
        }
    }

    /// The kernel dispatching this event.
    #[must_use]
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Emission handle for follow-up events.
    #[must_use]
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Routes and submits `event`, then schedules a drain.
    ///
    /// # Errors
    ///
    /// See [`Emitter::emit`].
    pub async fn emit(&self, event: Event) -> Result<Enqueued, RegistryError> {
        self.emitter.emit(event).await
    }

    /// Emits the response to `request` under `response_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Event`] if `request` has no correlation id,
    /// otherwise see [`Emitter::emit`].
    pub async fn respond(
        &self,
        request: &Event,
        response_type: &str,
        result: Result<Value, ErrorPayload>,
    ) -> Result<Enqueued, RegistryError> {
        let response = request.respond(response_type, result)?;
        self.emitter.emit(response).await
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("kernel", &self.kernel.id())
            .field("execution", self.kernel.execution_id())
            .field("attempt", &self.attempt)
            .finish()
    }
}
