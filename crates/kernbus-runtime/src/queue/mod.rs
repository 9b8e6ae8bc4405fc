//! Per-kernel event queue.
//!
//! # Lifecycle of an Event
//!
//! ```text
//! enqueue ──► [ready: priority desc, FIFO within priority]
//!                │ drain(batch_size)
//!                ▼
//!           [in flight] ──chunks of chunk_size──► Dispatch::dispatch
//!                │
//!     ┌──────────┼────────────────┬──────────────────┐
//!     ▼          ▼                ▼                  ▼
//!    Ack      Retry           Retry after        Fatal / NoHandler
//!     │     (attempt <=       max_retries              │
//!     │      max_retries)          │                   │
//!     ▼          │                 ▼                   ▼
//! [processed]    └──► [ready]  [dead letters] ◄────────┘
//! ```
//!
//! An event id is *known* while it is ready, in flight, or in the processed
//! cache. Enqueueing a known id is a no-op that reports
//! [`Enqueued::Duplicate`], which gives at-most-once handling per id within
//! the dedup window.
//!
//! # Backpressure
//!
//! See [`backpressure`] for when pressure engages. What `enqueue` does while
//! engaged depends on [`BackpressurePolicy`]:
//!
//! | Policy | Behavior |
//! |--------|----------|
//! | `reject` | `Err(QueueError::Backpressure)` immediately |
//! | `delay` | waits up to `max_delay_ms` for pressure to release, then rejects |
//! | `shed_lowest` | dead-letters the lowest-priority queued event if the new one outranks it, else rejects |

mod backpressure;
mod dead_letter;
mod dedup;
mod error;
mod metrics;

pub use backpressure::{NoPressure, PressureCause, ResourceProbe, ResourceSignals};
pub use dead_letter::{DeadLetter, DeadLetterReason};
pub use error::QueueError;
pub use metrics::{BackpressureGauge, QueueMetrics};

use crate::config::{BackpressureConfig, BackpressurePolicy, QueueConfig};
use async_trait::async_trait;
use backpressure::BackpressureMonitor;
use dead_letter::DeadLetterStore;
use dedup::DedupCache;
use futures::future::join_all;
use futures::FutureExt;
use kernbus_event::{Event, HandlerOutcome, Priority};
use kernbus_types::EventId;
use metrics::{QueueCounters, QueueGauges};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Re-check interval for delayed enqueues, so resource-driven pressure is
/// re-sampled even when no drain frees space.
const DELAY_POLL: Duration = Duration::from_millis(10);

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A handler or waiter took the event.
    Handled(HandlerOutcome),
    /// Nothing was registered for the event type.
    NoHandler,
}

/// Whether a dispatcher takes more work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Dispatch normally.
    Open,
    /// Keep remaining events queued.
    Paused,
    /// Dead-letter remaining events with the given fault.
    Halted(String),
}

/// Consumer side of an [`EventQueue`].
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Checked before every chunk of a drain.
    fn gate(&self) -> Gate;

    /// Delivers one event. `attempt` starts at 1.
    async fn dispatch(&self, event: Arc<Event>, attempt: u32) -> Delivery;
}

/// Result of a successful [`EventQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued for delivery.
    Accepted,
    /// The id is already known; nothing was queued.
    Duplicate,
    /// Queued after evicting a lower-priority event.
    AcceptedAfterShed {
        /// The evicted event.
        shed: EventId,
    },
}

impl Enqueued {
    /// Returns `true` if the event was queued.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// What one drain call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Events handed to the dispatcher.
    pub dispatched: usize,
    /// Events acknowledged.
    pub acked: usize,
    /// Events re-enqueued for another attempt.
    pub retried: usize,
    /// Events moved to the dead-letter store.
    pub dead_lettered: usize,
    /// Events put back untouched because the dispatcher paused.
    pub requeued: usize,
}

impl DrainReport {
    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: DrainReport) {
        self.dispatched += other.dispatched;
        self.acked += other.acked;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.requeued += other.requeued;
    }

    /// Returns `true` if nothing was dispatched.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.dispatched == 0
    }
}

/// Ordering key: higher priority first, then enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<Priority>,
    seq: u64,
}

#[derive(Debug)]
struct QueuedEvent {
    event: Arc<Event>,
    /// Deliveries already made.
    attempts: u32,
}

#[derive(Debug)]
struct QueueState {
    ready: BTreeMap<QueueKey, QueuedEvent>,
    queued: HashSet<EventId>,
    in_flight: HashSet<EventId>,
    processed: DedupCache,
    next_seq: u64,
    engaged: bool,
}

impl QueueState {
    fn is_known(&self, id: &EventId) -> bool {
        self.queued.contains(id) || self.in_flight.contains(id) || self.processed.contains(id)
    }

    fn push(&mut self, event: Arc<Event>, attempts: u32) {
        let key = QueueKey {
            priority: Reverse(event.priority()),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queued.insert(event.id());
        self.ready.insert(key, QueuedEvent { event, attempts });
    }

    fn lowest_priority(&self) -> Option<Priority> {
        self.ready.last_key_value().map(|(key, _)| key.priority.0)
    }
}

/// Priority queue with dedup, retries, dead letters and backpressure.
///
/// Owned by a single kernel. All methods take `&self`; state sits behind a
/// short-lived lock that is never held across an await.
#[derive(Debug)]
pub struct EventQueue {
    label: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    monitor: BackpressureMonitor,
    dead_letters: DeadLetterStore,
    counters: QueueCounters,
    space: Notify,
}

impl EventQueue {
    /// Creates an empty queue. `label` identifies it in logs.
    pub fn new(
        label: impl Into<String>,
        config: QueueConfig,
        backpressure: BackpressureConfig,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let processed = DedupCache::new(
            config.dedup_capacity,
            Duration::from_millis(config.dedup_ttl_ms),
        );
        Self {
            label: label.into(),
            dead_letters: DeadLetterStore::new(config.dead_letter_capacity),
            config,
            state: Mutex::new(QueueState {
                ready: BTreeMap::new(),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
                processed,
                next_seq: 0,
                engaged: false,
            }),
            monitor: BackpressureMonitor::new(backpressure, probe),
            counters: QueueCounters::default(),
            space: Notify::new(),
        }
    }

    /// Queues an event for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backpressure`] when pressure is engaged and the
    /// configured policy refuses the event.
    pub async fn enqueue(&self, event: Arc<Event>) -> Result<Enqueued, QueueError> {
        let mut deadline: Option<Instant> = None;

        loop {
            let notified = self.space.notified();
            {
                let mut state = self.state.lock();
                let id = event.id();

                if state.is_known(&id) {
                    QueueCounters::bump(&self.counters.duplicates);
                    debug!(queue = %self.label, event_id = %id, "Duplicate event dropped");
                    return Ok(Enqueued::Duplicate);
                }

                let depth = state.ready.len();
                let Some(cause) = self.monitor.evaluate(&self.label, depth, &mut state.engaged)
                else {
                    state.push(Arc::clone(&event), 0);
                    QueueCounters::bump(&self.counters.enqueued);
                    trace!(queue = %self.label, event_id = %id, depth = depth + 1, "Event enqueued");
                    return Ok(Enqueued::Accepted);
                };

                match self.monitor.config().policy {
                    BackpressurePolicy::Reject => return Err(self.refuse(&event, depth, cause)),
                    BackpressurePolicy::ShedLowest => {
                        let outranks = state
                            .lowest_priority()
                            .is_some_and(|lowest| event.priority() > lowest);
                        let victim = if outranks { state.ready.pop_last() } else { None };
                        let Some((_, victim)) = victim else {
                            return Err(self.refuse(&event, depth, cause));
                        };

                        let shed = victim.event.id();
                        state.queued.remove(&shed);
                        state.processed.insert(shed);
                        state.push(Arc::clone(&event), 0);
                        drop(state);

                        QueueCounters::bump(&self.counters.shed);
                        QueueCounters::bump(&self.counters.enqueued);
                        self.dead_letter(victim.event, DeadLetterReason::Shed, victim.attempts);
                        return Ok(Enqueued::AcceptedAfterShed { shed });
                    }
                    BackpressurePolicy::Delay => {
                        let now = Instant::now();
                        let until = match deadline {
                            Some(until) => until,
                            None => {
                                QueueCounters::bump(&self.counters.delayed);
                                debug!(queue = %self.label, event_id = %id, depth, "Enqueue delayed by backpressure");
                                let until = now
                                    + Duration::from_millis(self.monitor.config().max_delay_ms);
                                deadline = Some(until);
                                until
                            }
                        };
                        if now >= until {
                            return Err(self.refuse(&event, depth, cause));
                        }
                    }
                }
            }

            let poll = Instant::now() + DELAY_POLL;
            let wake = deadline.map_or(poll, |until| until.min(poll));
            // Elapsed is fine: the loop re-evaluates either way.
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    fn refuse(&self, event: &Event, depth: usize, cause: PressureCause) -> QueueError {
        QueueCounters::bump(&self.counters.rejected);
        let config = self.monitor.config();
        debug!(
            queue = %self.label,
            event_id = %event.id(),
            policy = %config.policy,
            depth,
            %cause,
            "Event refused by backpressure"
        );
        QueueError::Backpressure {
            event_id: event.id(),
            policy: config.policy,
            depth,
            cause,
        }
    }

    /// Pops up to `batch_size` events and dispatches them in chunks of
    /// `chunk_size`, each chunk concurrently.
    ///
    /// Events re-enqueued for retry during this call are not delivered
    /// again until the next drain. A panicking dispatch is treated as a
    /// retryable failure.
    pub async fn drain<D>(&self, batch_size: usize, dispatcher: &D) -> DrainReport
    where
        D: Dispatch + ?Sized,
    {
        let mut report = DrainReport::default();
        if dispatcher.gate() != Gate::Open {
            return report;
        }

        let mut rest: Vec<(QueueKey, QueuedEvent)> = {
            let mut state = self.state.lock();
            let mut batch = Vec::with_capacity(batch_size.min(state.ready.len()));
            while batch.len() < batch_size {
                let Some((key, item)) = state.ready.pop_first() else {
                    break;
                };
                let id = item.event.id();
                state.queued.remove(&id);
                state.in_flight.insert(id);
                batch.push((key, item));
            }
            batch
        };

        if rest.is_empty() {
            return report;
        }
        self.space.notify_waiters();
        debug!(queue = %self.label, batch = rest.len(), "Draining batch");

        let chunk_size = self.config.chunk_size.max(1);
        while !rest.is_empty() {
            match dispatcher.gate() {
                Gate::Open => {}
                Gate::Paused => {
                    report.requeued += rest.len();
                    self.restore(rest);
                    break;
                }
                Gate::Halted(fault) => {
                    for (_, item) in rest {
                        self.settle_halted(item, &fault, &mut report);
                    }
                    break;
                }
            }

            let tail = rest.split_off(chunk_size.min(rest.len()));
            let chunk = std::mem::replace(&mut rest, tail);

            let deliveries = join_all(chunk.iter().map(|(_, item)| {
                let attempt = item.attempts + 1;
                let delivery =
                    AssertUnwindSafe(dispatcher.dispatch(Arc::clone(&item.event), attempt))
                        .catch_unwind();
                async move {
                    delivery.await.unwrap_or_else(|_| {
                        Delivery::Handled(HandlerOutcome::retry("handler panicked"))
                    })
                }
            }))
            .await;

            report.dispatched += chunk.len();
            for ((_, item), delivery) in chunk.into_iter().zip(deliveries) {
                self.settle(item, delivery, &mut report);
            }
        }

        report
    }

    fn settle(&self, item: QueuedEvent, delivery: Delivery, report: &mut DrainReport) {
        let attempts = item.attempts + 1;
        let id = item.event.id();
        let mut state = self.state.lock();
        state.in_flight.remove(&id);

        let reason = match delivery {
            Delivery::Handled(HandlerOutcome::Ack) => {
                state.processed.insert(id);
                QueueCounters::bump(&self.counters.processed);
                report.acked += 1;
                return;
            }
            Delivery::Handled(HandlerOutcome::Retry { reason }) => {
                if attempts <= self.config.max_retries {
                    debug!(
                        queue = %self.label,
                        event_id = %id,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        reason = %reason,
                        "Event scheduled for retry"
                    );
                    state.push(item.event, attempts);
                    QueueCounters::bump(&self.counters.retried);
                    report.retried += 1;
                    return;
                }
                DeadLetterReason::RetriesExhausted { last_error: reason }
            }
            Delivery::Handled(HandlerOutcome::Fatal { reason }) => {
                DeadLetterReason::Fatal { error: reason }
            }
            Delivery::NoHandler => DeadLetterReason::NoHandler,
        };

        state.processed.insert(id);
        drop(state);
        report.dead_lettered += 1;
        self.dead_letter(item.event, reason, attempts);
    }

    fn settle_halted(&self, item: QueuedEvent, fault: &str, report: &mut DrainReport) {
        let id = item.event.id();
        {
            let mut state = self.state.lock();
            state.in_flight.remove(&id);
            state.processed.insert(id);
        }
        report.dead_lettered += 1;
        self.dead_letter(
            item.event,
            DeadLetterReason::KernelHalted {
                fault: fault.to_string(),
            },
            item.attempts,
        );
    }

    /// Puts popped events back at their original position.
    fn restore(&self, items: Vec<(QueueKey, QueuedEvent)>) {
        let mut state = self.state.lock();
        for (key, item) in items {
            let id = item.event.id();
            state.in_flight.remove(&id);
            state.queued.insert(id);
            state.ready.insert(key, item);
        }
    }

    fn dead_letter(&self, event: Arc<Event>, reason: DeadLetterReason, attempts: u32) {
        QueueCounters::bump(&self.counters.dead_lettered);
        self.dead_letters.push(event, reason, attempts);
    }

    /// Moves every ready event to the dead-letter store. Returns how many
    /// were moved.
    pub fn flush_to_dead_letters(&self, fault: &str) -> usize {
        let drained: Vec<QueuedEvent> = {
            let mut state = self.state.lock();
            let ready = std::mem::take(&mut state.ready);
            for item in ready.values() {
                let id = item.event.id();
                state.queued.remove(&id);
                state.processed.insert(id);
            }
            ready.into_values().collect()
        };

        let count = drained.len();
        if count > 0 {
            warn!(queue = %self.label, count, fault, "Flushing queue to dead letters");
        }
        for item in drained {
            self.dead_letter(
                item.event,
                DeadLetterReason::KernelHalted {
                    fault: fault.to_string(),
                },
                item.attempts,
            );
        }
        self.space.notify_waiters();
        count
    }

    /// Events waiting to be drained.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Events currently being dispatched.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Whether backpressure was engaged at the last evaluation.
    #[must_use]
    pub fn is_backpressured(&self) -> bool {
        self.state.lock().engaged
    }

    /// Whether `id` is ready, in flight, or recently processed.
    #[must_use]
    pub fn is_known(&self, id: &EventId) -> bool {
        self.state.lock().is_known(id)
    }

    /// Retained dead letters, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.list()
    }

    /// Removes and returns all retained dead letters.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.take_all()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        let gauges = {
            let state = self.state.lock();
            QueueGauges {
                depth: state.ready.len(),
                in_flight: state.in_flight.len(),
                dedup_cached: state.processed.len(),
                engaged: state.engaged,
                dead_letters: self.dead_letters.len(),
            }
        };
        self.counters.snapshot(gauges, self.monitor.config())
    }
}
