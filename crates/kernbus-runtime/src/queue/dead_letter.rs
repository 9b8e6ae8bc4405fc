//! Dead-letter store.

use chrono::{DateTime, Utc};
use kernbus_event::Event;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Why an event left the queue without being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The handler asked for a retry more often than `max_retries` allows.
    RetriesExhausted { last_error: String },
    /// The handler reported a non-retryable failure.
    Fatal { error: String },
    /// Evicted by the shed-lowest backpressure policy.
    Shed,
    /// No handler or waiter was registered for the event type.
    NoHandler,
    /// The owning kernel failed while the event was queued.
    KernelHalted { fault: String },
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted { last_error } => write!(f, "retries exhausted: {last_error}"),
            Self::Fatal { error } => write!(f, "fatal: {error}"),
            Self::Shed => f.write_str("shed under backpressure"),
            Self::NoHandler => f.write_str("no handler registered"),
            Self::KernelHalted { fault } => write!(f, "kernel halted: {fault}"),
        }
    }
}

/// An event that will not be delivered again.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    /// The event as it was last queued.
    pub event: Arc<Event>,
    /// Why it was dead-lettered.
    #[serde(flatten)]
    pub reason: DeadLetterReason,
    /// Delivery attempts made before giving up.
    pub attempts: u32,
    /// When it was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Ring buffer of dead letters. The oldest entry is dropped at capacity.
#[derive(Debug)]
pub(crate) struct DeadLetterStore {
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, event: Arc<Event>, reason: DeadLetterReason, attempts: u32) {
        warn!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            attempts,
            reason = %reason,
            "Event dead-lettered"
        );

        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(DeadLetter {
            event,
            reason,
            attempts,
            dead_lettered_at: Utc::now(),
        });
    }

    pub(crate) fn list(&self) -> Vec<DeadLetter> {
        self.entries.lock().iter().cloned().collect()
    }

    pub(crate) fn take_all(&self) -> Vec<DeadLetter> {
        self.entries.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
