//! Sliding-window loop protection.

use super::KernelFault;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Tracked type count above which a new type first prunes stale ones.
const PRUNE_AT: usize = 32;

/// Per-event-type timestamps inside the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopProtection {
    pub window_ms: u64,
    pub max_events_per_window: u32,
    /// Epoch ms of recent events, oldest first.
    pub windows: BTreeMap<String, VecDeque<i64>>,
}

impl LoopProtection {
    pub fn new(window_ms: u64, max_events_per_window: u32) -> Self {
        Self {
            window_ms,
            max_events_per_window,
            windows: BTreeMap::new(),
        }
    }

    /// Records one `event_type` at `now_ms`.
    ///
    /// Recording a type not seen in the window drops stale types once more
    /// than `PRUNE_AT` are tracked, so the map stays bounded by the types
    /// active within one window.
    ///
    /// # Errors
    ///
    /// Returns [`KernelFault::LoopDetected`] once the window holds more than
    /// `max_events_per_window` events of that type.
    pub fn check(&mut self, event_type: &str, now_ms: i64) -> Result<(), KernelFault> {
        let window = i64::try_from(self.window_ms).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window);

        if self.windows.len() >= PRUNE_AT && !self.windows.contains_key(event_type) {
            self.prune(now_ms);
        }
        let times = self.windows.entry(event_type.to_string()).or_default();
        while times.front().is_some_and(|&t| t <= cutoff) {
            times.pop_front();
        }
        times.push_back(now_ms);

        let count = times.len();
        if count > self.max_events_per_window as usize {
            return Err(KernelFault::LoopDetected {
                event_type: event_type.to_string(),
                count,
                window_ms: self.window_ms,
            });
        }
        Ok(())
    }

    /// Drops event types with no timestamp inside the window.
    pub fn prune(&mut self, now_ms: i64) {
        let window = i64::try_from(self.window_ms).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window);
        self.windows
            .retain(|_, times| times.back().is_some_and(|&t| t > cutoff));
    }
}
