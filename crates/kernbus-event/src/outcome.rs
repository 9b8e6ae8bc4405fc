//! What a handler reports back to the queue.

use serde::{Deserialize, Serialize};

/// Per-event result of a handler invocation.
///
/// The EventQueue interprets it as:
///
/// | Outcome | Queue action |
/// |---------|--------------|
/// | [`Ack`](Self::Ack) | removed, id kept in the dedup cache |
/// | [`Retry`](Self::Retry) | re-enqueued until `max_retries`, then dead-lettered |
/// | [`Fatal`](Self::Fatal) | dead-lettered immediately |
///
/// # Example
///
/// ```
/// use kernbus_event::HandlerOutcome;
///
/// let outcome = HandlerOutcome::retry("upstream busy");
/// assert!(outcome.is_retryable());
/// assert!(!HandlerOutcome::Ack.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// Processed successfully.
    Ack,
    /// Transient failure; the event may be retried.
    Retry {
        /// Why processing failed.
        reason: String,
    },
    /// Permanent failure; the event must not be retried.
    Fatal {
        /// Why processing failed.
        reason: String,
    },
}

impl HandlerOutcome {
    /// Creates a retryable failure.
    #[must_use]
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Retry {
            reason: reason.into(),
        }
    }

    /// Creates a non-retryable failure.
    #[must_use]
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`Ack`](Self::Ack).
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    /// Returns `true` for [`Retry`](Self::Retry).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    /// Returns the failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ack => None,
            Self::Retry { reason } | Self::Fatal { reason } => Some(reason),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for HandlerOutcome {
    /// Maps `Err` to a retryable failure.
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Ack,
            Err(e) => Self::retry(e.to_string()),
        }
    }
}
