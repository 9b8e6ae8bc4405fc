//! Queue counters.

use crate::config::{BackpressureConfig, BackpressurePolicy};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) duplicates: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) dead_lettered: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) delayed: AtomicU64,
    pub(crate) shed: AtomicU64,
}

/// Values read under the queue lock at snapshot time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueGauges {
    pub(crate) depth: usize,
    pub(crate) in_flight: usize,
    pub(crate) dedup_cached: usize,
    pub(crate) engaged: bool,
    pub(crate) dead_letters: usize,
}

impl QueueCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        gauges: QueueGauges,
        backpressure: &BackpressureConfig,
    ) -> QueueMetrics {
        QueueMetrics {
            depth: gauges.depth,
            in_flight: gauges.in_flight,
            dedup_cached: gauges.dedup_cached,
            dead_letters: gauges.dead_letters,
            backpressure: BackpressureGauge {
                policy: backpressure.policy,
                engaged: gauges.engaged,
                high_watermark: backpressure.high_watermark,
                low_watermark: backpressure.low_watermark,
                memory_threshold: backpressure.memory_threshold,
                cpu_threshold: backpressure.cpu_threshold,
            },
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
        }
    }
}

/// Backpressure policy, boundaries and current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackpressureGauge {
    pub policy: BackpressurePolicy,
    pub engaged: bool,
    pub high_watermark: usize,
    pub low_watermark: usize,
    pub memory_threshold: f64,
    pub cpu_threshold: f64,
}

/// Point-in-time view of an EventQueue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueMetrics {
    /// Events waiting to be drained.
    pub depth: usize,
    /// Events currently being dispatched.
    pub in_flight: usize,
    /// Processed ids held for deduplication.
    pub dedup_cached: usize,
    /// Dead letters currently retained.
    pub dead_letters: usize,
    pub backpressure: BackpressureGauge,
    /// Events accepted since creation.
    pub enqueued: u64,
    /// Duplicate submissions dropped.
    pub duplicates: u64,
    /// Events acknowledged.
    pub processed: u64,
    /// Re-enqueues after a retryable failure.
    pub retried: u64,
    /// Events moved to the dead-letter store.
    pub dead_lettered: u64,
    /// Submissions rejected by backpressure.
    pub rejected: u64,
    /// Submissions that waited under the delay policy.
    pub delayed: u64,
    /// Queued events evicted by the shed-lowest policy.
    pub shed: u64,
}
