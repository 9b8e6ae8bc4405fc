//! Kernel status and faults.
//!
//! # State Machine
//!
//! ```text
//!             submit / start / resume
//!   ┌──────┐ ───────────────────────► ┌─────────┐
//!   │ Idle │                          │ Running │ ◄──┐
//!   └──────┘                          └─────────┘    │ resume
//!                                          │ pause   │
//!                                          ▼         │
//!                                     ┌────────┐ ────┘
//!                                     │ Paused │
//!                                     └────────┘
//!
//!   any non-terminal ──complete──► Completed
//!   any non-terminal ──fault─────► Failed
//! ```
//!
//! Only a running kernel can pause. Resuming an idle kernel rehydrates a
//! fresh instance from a snapshot and lands in `Running`.
//!
//! `Completed` and `Failed` are terminal: the kernel accepts no events and
//! dispatches nothing.

use super::QuotaLimit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    /// Created, nothing submitted yet.
    #[default]
    Idle,
    /// Accepting and dispatching events.
    Running,
    /// Accepting events, dispatching nothing.
    Paused,
    /// Finished normally.
    Completed,
    /// Stopped by a fault.
    Failed,
}

impl KernelStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if the transition `self -> next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: KernelStatus) -> bool {
        use KernelStatus::*;
        match (self, next) {
            (Idle, Running) => true,
            (Running, Paused) | (Paused, Running) => true,
            (from, Completed | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Why a kernel failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelFault {
    /// A quota was exceeded.
    QuotaExceeded { limit: QuotaLimit },
    /// Too many events of one type inside the loop window.
    LoopDetected {
        event_type: String,
        count: usize,
        window_ms: u64,
    },
    /// Failed explicitly by the application.
    Failed { reason: String },
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded { limit } => write!(f, "quota exceeded: {limit}"),
            Self::LoopDetected {
                event_type,
                count,
                window_ms,
            } => write!(
                f,
                "loop detected: {count} '{event_type}' events within {window_ms}ms"
            ),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use KernelStatus::*;

    #[test]
    fn transitions() {
        assert!(Idle.can_transition_to(Running));
        assert!(!Idle.can_transition_to(Paused));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));

        assert!(!Running.can_transition_to(Idle));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn fault_display_and_serde() {
        let fault = KernelFault::LoopDetected {
            event_type: "ping".into(),
            count: 4,
            window_ms: 1000,
        };
        assert_eq!(fault.to_string(), "loop detected: 4 'ping' events within 1000ms");

        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(value["kind"], "loop_detected");
        let back: KernelFault = serde_json::from_value(value).unwrap();
        assert_eq!(back, fault);
    }
}
