//! Reusable handlers and probes.
//!
//! Used by the crate's own tests, the integration suite and the CLI demo.
//!
//! | Type | Behavior |
//! |------|----------|
//! | [`EchoResponder`] | answers a request with its own payload |
//! | [`RecordingHandler`] | keeps every delivered event, returns a fixed outcome |
//! | [`FailingHandler`] | fails a set number of times, then acks |
//! | [`StaticProbe`] | reports resource signals set by the test |

use crate::dispatch::{EventHandler, HandlerContext};
use crate::queue::{ResourceProbe, ResourceSignals};
use async_trait::async_trait;
use kernbus_event::{Event, HandlerOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Responds to each request under `response_type` with the request's data.
#[derive(Debug)]
pub struct EchoResponder {
    response_type: String,
    calls: AtomicUsize,
}

impl EchoResponder {
    pub fn new(response_type: impl Into<String>) -> Self {
        Self {
            response_type: response_type.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of requests handled, including redeliveries.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for EchoResponder {
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match ctx
            .respond(&event, &self.response_type, Ok(event.data().clone()))
            .await
        {
            Ok(_) => HandlerOutcome::Ack,
            Err(e) => HandlerOutcome::fatal(e.to_string()),
        }
    }
}

/// Records delivered events.
#[derive(Debug)]
pub struct RecordingHandler {
    events: Mutex<Vec<Arc<Event>>>,
    outcome: HandlerOutcome,
}

impl RecordingHandler {
    /// A recorder that acks everything.
    pub fn new() -> Self {
        Self::with_outcome(HandlerOutcome::Ack)
    }

    pub fn with_outcome(outcome: HandlerOutcome) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            outcome,
        }
    }

    /// Delivered events in delivery order.
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: Arc<Event>, _ctx: HandlerContext) -> HandlerOutcome {
        self.events.lock().push(event);
        self.outcome.clone()
    }
}

/// Fails the first `failures` deliveries, then acks.
#[derive(Debug)]
pub struct FailingHandler {
    remaining: AtomicU32,
    retryable: bool,
    calls: AtomicUsize,
}

impl FailingHandler {
    /// Returns [`HandlerOutcome::Retry`] `failures` times.
    pub fn retrying(failures: u32) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
            retryable: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns [`HandlerOutcome::Fatal`] on every delivery.
    pub fn fatal() -> Self {
        Self {
            remaining: AtomicU32::new(u32::MAX),
            retryable: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, event: Arc<Event>, ctx: HandlerContext) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !failed {
            return HandlerOutcome::Ack;
        }
        let reason = format!("{} failed on attempt {}", event.event_type(), ctx.attempt());
        if self.retryable {
            HandlerOutcome::retry(reason)
        } else {
            HandlerOutcome::fatal(reason)
        }
    }
}

/// Resource probe with values set by hand.
#[derive(Debug, Default)]
pub struct StaticProbe {
    memory: AtomicU64,
    cpu: AtomicU64,
}

impl StaticProbe {
    pub fn new(memory_pressure: f64, cpu_pressure: f64) -> Self {
        let probe = Self::default();
        probe.set(memory_pressure, cpu_pressure);
        probe
    }

    pub fn set(&self, memory_pressure: f64, cpu_pressure: f64) {
        self.memory
            .store(memory_pressure.to_bits(), Ordering::SeqCst);
        self.cpu.store(cpu_pressure.to_bits(), Ordering::SeqCst);
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&self) -> ResourceSignals {
        ResourceSignals {
            memory_pressure: f64::from_bits(self.memory.load(Ordering::SeqCst)),
            cpu_pressure: f64::from_bits(self.cpu.load(Ordering::SeqCst)),
        }
    }
}
