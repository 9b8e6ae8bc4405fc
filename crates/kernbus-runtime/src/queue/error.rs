//! Queue errors.

use super::PressureCause;
use crate::config::BackpressurePolicy;
use kernbus_types::{ErrorCode, EventId};
use thiserror::Error;

/// Errors returned by [`EventQueue::enqueue`](super::EventQueue::enqueue).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Backpressure is engaged and the policy refused the event.
    #[error("backpressure engaged ({policy}, {cause}): depth {depth}, event {event_id} refused")]
    Backpressure {
        event_id: EventId,
        policy: BackpressurePolicy,
        depth: usize,
        cause: PressureCause,
    },
}

impl ErrorCode for QueueError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backpressure { .. } => "QUEUE_BACKPRESSURE",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Backpressure { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::assert_error_code;

    #[test]
    fn backpressure_is_recoverable() {
        let err = QueueError::Backpressure {
            event_id: EventId::new(),
            policy: BackpressurePolicy::Reject,
            depth: 0,
            cause: PressureCause::Resource,
        };
        assert_error_code(&err, "QUEUE_");
        assert!(err.is_recoverable());
        let message = err.to_string();
        assert!(message.contains("reject"));
        assert!(message.contains("resource pressure"));
    }
}
