//! Handler and waiter registration for a kernel.
//!
//! Every kernel owns one [`DispatchTable`]. When its queue drains an event,
//! the kernel looks it up here:
//!
//! 1. a waiter registered for `(event type, correlation id)` wins and is
//!    removed as it resolves;
//! 2. otherwise the handler registered for the event type runs;
//! 3. otherwise the event is dead-lettered as unhandled.
//!
//! Waiters take precedence so a response is never swallowed by a generic
//! handler that happens to subscribe to the same type.

mod handler;
mod waiter;

pub use handler::{handler_fn, EventHandler, FnHandler, HandlerContext};
pub use waiter::WaiterResult;

use crate::kernel::KernelFault;
use kernbus_types::CorrelationId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use waiter::WaiterTable;

/// Handlers by event type plus pending one-shot waiters.
#[derive(Default)]
pub struct DispatchTable {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    waiters: Mutex<WaiterTable>,
}

impl DispatchTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_type`, returning the one it replaced.
    pub fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        let event_type = event_type.into();
        let previous = self.handlers.write().insert(event_type.clone(), handler);
        if previous.is_some() {
            warn!(event_type = %event_type, "Handler replaced");
        } else {
            debug!(event_type = %event_type, "Handler registered");
        }
        previous
    }

    /// Removes the handler for `event_type`.
    pub fn unregister_handler(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.write().remove(event_type)
    }

    /// Returns the handler for `event_type`.
    #[must_use]
    pub fn handler(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.read().get(event_type).cloned()
    }

    /// Returns `true` if a handler is registered for `event_type`.
    #[must_use]
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.read().contains_key(event_type)
    }

    pub(crate) fn register_waiter(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
        deadline: Instant,
    ) -> Option<oneshot::Receiver<WaiterResult>> {
        self.waiters
            .lock()
            .insert(event_type, correlation_id, deadline)
    }

    pub(crate) fn take_waiter(
        &self,
        event_type: &str,
        correlation_id: CorrelationId,
    ) -> Option<oneshot::Sender<WaiterResult>> {
        self.waiters.lock().take(event_type, correlation_id)
    }

    pub(crate) fn remove_waiter(&self, event_type: &str, correlation_id: CorrelationId) -> bool {
        self.waiters.lock().remove(event_type, correlation_id)
    }

    pub(crate) fn reap_expired_waiters(&self, now: Instant) -> usize {
        self.waiters.lock().reap_expired(now)
    }

    pub(crate) fn fail_waiters(&self, fault: &KernelFault) -> usize {
        self.waiters.lock().fail_all(fault)
    }

    pub(crate) fn clear_waiters(&self) -> usize {
        self.waiters.lock().clear()
    }

    /// Pending waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        f.debug_struct("DispatchTable")
            .field("handlers", &types)
            .field("waiters", &self.waiter_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_event::HandlerOutcome;

    #[test]
    fn register_replaces_and_returns_previous() {
        let table = DispatchTable::new();
        let first = handler_fn(|_, _| async { HandlerOutcome::Ack });
        let second = handler_fn(|_, _| async { HandlerOutcome::fatal("v2") });

        assert!(table.register_handler("job.step", first).is_none());
        assert!(table.register_handler("job.step", second).is_some());
        assert!(table.has_handler("job.step"));

        assert!(table.unregister_handler("job.step").is_some());
        assert!(table.handler("job.step").is_none());
    }

    #[test]
    fn waiter_bookkeeping() {
        let table = DispatchTable::new();
        let cid = CorrelationId::new();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);

        let _rx = table.register_waiter("tool.response", cid, deadline).unwrap();
        assert_eq!(table.waiter_count(), 1);
        assert!(table.remove_waiter("tool.response", cid));
        assert!(!table.remove_waiter("tool.response", cid));
        assert_eq!(table.waiter_count(), 0);
    }
}
