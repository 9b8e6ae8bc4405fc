//! Event and duration quotas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which quota was exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "quota", rename_all = "snake_case")]
pub enum QuotaLimit {
    /// More events recorded than `max_events`.
    Events { max: u64, consumed: u64 },
    /// Active time beyond `max_duration_ms`.
    Duration { max_ms: u64, elapsed_ms: u64 },
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Events { max, consumed } => write!(f, "{consumed} events > max {max}"),
            Self::Duration { max_ms, elapsed_ms } => {
                write!(f, "{elapsed_ms}ms active > max {max_ms}ms")
            }
        }
    }
}

/// Quota counters of one kernel.
///
/// Active time only accrues while the kernel runs: `active_ms` holds the
/// time accumulated before the current run, `running_since` marks the
/// start of the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotas {
    pub max_events: u64,
    pub max_duration_ms: u64,
    pub consumed_events: u64,
    /// Epoch ms of the first start.
    pub started_at: Option<i64>,
    pub active_ms: u64,
    pub running_since: Option<i64>,
}

impl Quotas {
    pub fn new(max_events: u64, max_duration_ms: u64) -> Self {
        Self {
            max_events,
            max_duration_ms,
            consumed_events: 0,
            started_at: None,
            active_ms: 0,
            running_since: None,
        }
    }

    /// Starts accruing active time.
    pub fn begin(&mut self, now_ms: i64) {
        self.started_at.get_or_insert(now_ms);
        if self.running_since.is_none() {
            self.running_since = Some(now_ms);
        }
    }

    /// Stops accruing active time.
    pub fn suspend(&mut self, now_ms: i64) {
        if let Some(since) = self.running_since.take() {
            self.active_ms += elapsed(since, now_ms);
        }
    }

    /// Active time up to `now_ms`.
    #[must_use]
    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        self.active_ms + self.running_since.map_or(0, |since| elapsed(since, now_ms))
    }

    /// Counts one event and checks both limits.
    ///
    /// # Errors
    ///
    /// Returns the first limit exceeded. The event is counted either way.
    pub fn record(&mut self, now_ms: i64) -> Result<(), QuotaLimit> {
        self.consumed_events += 1;
        if self.consumed_events > self.max_events {
            return Err(QuotaLimit::Events {
                max: self.max_events,
                consumed: self.consumed_events,
            });
        }
        let elapsed_ms = self.elapsed_ms(now_ms);
        if elapsed_ms > self.max_duration_ms {
            return Err(QuotaLimit::Duration {
                max_ms: self.max_duration_ms,
                elapsed_ms,
            });
        }
        Ok(())
    }
}

fn elapsed(since: i64, now_ms: i64) -> u64 {
    u64::try_from(now_ms.saturating_sub(since)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_event_exceeds_max_five() {
        let mut q = Quotas::new(5, u64::MAX);
        q.begin(0);
        for _ in 0..5 {
            assert!(q.record(0).is_ok());
        }
        assert_eq!(
            q.record(0),
            Err(QuotaLimit::Events {
                max: 5,
                consumed: 6
            })
        );
    }

    #[test]
    fn paused_time_is_not_counted() {
        let mut q = Quotas::new(u64::MAX, 100);
        q.begin(1_000);
        q.suspend(1_060);
        // paused for a long time
        q.begin(50_000);
        assert_eq!(q.elapsed_ms(50_030), 90);
        assert!(q.record(50_030).is_ok());
        assert!(matches!(
            q.record(50_041),
            Err(QuotaLimit::Duration {
                elapsed_ms: 101,
                ..
            })
        ));
        assert_eq!(q.started_at, Some(1_000));
    }

    #[test]
    fn clock_going_backwards_counts_as_zero() {
        let mut q = Quotas::new(10, 10);
        q.begin(500);
        assert_eq!(q.elapsed_ms(400), 0);
    }
}
