//! Request/response over one-way events.
//!
//! # Request Flow
//!
//! ```text
//! request(req_type, data, resp_type, timeout)
//!   │
//!   ├─ 1. correlation id = new
//!   ├─ 2. waiter (resp_type, cid) on route(resp_type)   ← before emitting
//!   ├─ 3. Event(req_type, cid) → route(req_type)
//!   ├─ 4. schedule drain
//!   └─ 5. wait for the first of:
//!          response with cid  → Ok(data) | Err(Remote)
//!          deadline           → Err(Timeout)
//!          kernel fault       → Err(KernelFailed)
//! ```
//!
//! Routing for steps 2 and 3 is the registry's [`RoutingPolicy`], the same
//! function handlers and producers use. The waiter and the pending entry
//! are removed on every exit path, including the caller dropping the
//! request future.
//!
//! [`RoutingPolicy`]: crate::registry::RoutingPolicy

mod error;
mod pending;

pub use error::RequestError;
pub use pending::PendingRequest;

use crate::config::RouterConfig;
use crate::kernel::Kernel;
use crate::registry::KernelRegistry;
use kernbus_event::Event;
use kernbus_types::CorrelationId;
use pending::{PendingGuard, PendingTable};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Client-facing request façade over one execution's registry.
#[derive(Debug)]
pub struct RequestRouter {
    registry: Arc<KernelRegistry>,
    pending: PendingTable,
    default_timeout: Duration,
    closed: AtomicBool,
}

impl RequestRouter {
    pub fn new(registry: Arc<KernelRegistry>, config: &RouterConfig) -> Self {
        Self {
            registry,
            pending: PendingTable::default(),
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Sends `request_type` and waits for the correlated `response_type`.
    ///
    /// `timeout` defaults to the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Timeout`] if nothing arrives in time
    /// - [`RequestError::Remote`] if the response carries an error payload
    /// - [`RequestError::KernelFailed`] / [`RequestError::KernelClosed`] if
    ///   a kernel on the path stops, without waiting for the deadline
    /// - [`RequestError::Backpressure`] if the request kernel refuses the
    ///   event
    /// - [`RequestError::Shutdown`] after [`close`](Self::close)
    pub async fn request(
        &self,
        request_type: &str,
        data: Value,
        response_type: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RequestError::Shutdown);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlation_id = CorrelationId::new();
        let deadline = Instant::now() + timeout;

        let response_kernel = Arc::clone(
            self.registry
                .require(&self.registry.route_kernel(response_type))?,
        );
        let request_kernel = Arc::clone(
            self.registry
                .require(&self.registry.route_kernel(request_type))?,
        );

        let rx = response_kernel.register_waiter(response_type, correlation_id, deadline)?;
        let _pending = PendingGuard::new(
            &self.pending,
            Arc::clone(&response_kernel),
            PendingRequest {
                correlation_id,
                request_type: request_type.to_string(),
                response_type: response_type.to_string(),
                response_kernel: response_kernel.id().clone(),
                deadline,
            },
        );

        let event = Event::builder(request_type, self.registry.execution_id().tenant().clone())
            .correlation_id(correlation_id)
            .data(data)
            .build()?;
        self.registry.emit(event).await?;
        self.registry.schedule_drain();
        debug!(
            correlation_id = %correlation_id,
            request_type,
            response_type,
            timeout_ms = duration_ms(timeout),
            "Request sent"
        );

        let outcome = tokio::select! {
            biased;
            received = tokio::time::timeout_at(deadline, rx) => received,
            status = request_kernel.terminated() => {
                return Err(closed_error(&request_kernel, status));
            }
        };

        match outcome {
            Ok(Ok(Ok(response))) => response.response_result().map_err(RequestError::Remote),
            Ok(Ok(Err(fault))) => Err(RequestError::KernelFailed {
                kernel: response_kernel.id().clone(),
                fault,
            }),
            Err(_elapsed) => {
                debug!(correlation_id = %correlation_id, "Request timed out");
                Err(timeout_error(correlation_id, timeout))
            }
            // waiter dropped without resolving
            Ok(Err(_closed)) => {
                if Instant::now() >= deadline {
                    Err(timeout_error(correlation_id, timeout))
                } else if response_kernel.is_terminal() {
                    Err(closed_error(&response_kernel, response_kernel.status()))
                } else {
                    Err(RequestError::Shutdown)
                }
            }
        }
    }

    /// Requests currently waiting, earliest deadline first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRequest> {
        self.pending.list()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Reaps requests and waiters whose deadline passed. Returns how many
    /// waiters were dropped.
    ///
    /// A request normally cleans up after itself; this only catches entries
    /// whose caller stopped being polled.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut reaped = 0;
        for expired in self.pending.take_expired(now) {
            if let Some(kernel) = self.registry.kernel(&expired.response_kernel) {
                if kernel.remove_waiter(&expired.response_type, expired.correlation_id) {
                    reaped += 1;
                }
            }
        }
        reaped += self.registry.reap_expired_waiters(now);
        if reaped > 0 {
            debug!(execution = %self.registry.execution_id(), reaped, "Swept expired waiters");
        }
        reaped
    }

    /// Refuses new requests and fails waiting ones with
    /// [`RequestError::Shutdown`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = self.registry.close();
            debug!(execution = %self.registry.execution_id(), dropped, "Router closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn timeout_error(correlation_id: CorrelationId, timeout: Duration) -> RequestError {
    RequestError::Timeout {
        correlation_id,
        timeout_ms: duration_ms(timeout),
    }
}

fn closed_error(kernel: &Kernel, status: crate::kernel::KernelStatus) -> RequestError {
    match kernel.fault() {
        Some(fault) => RequestError::KernelFailed {
            kernel: kernel.id().clone(),
            fault,
        },
        None => RequestError::KernelClosed {
            kernel: kernel.id().clone(),
            status,
        },
    }
}
