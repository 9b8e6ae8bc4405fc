//! Event layer errors.
//!
//! | Error | Code | Recoverable |
//! |-------|------|-------------|
//! | [`EventError::EmptyType`] | `EVENT_EMPTY_TYPE` | No |
//! | [`EventError::MissingCorrelation`] | `EVENT_MISSING_CORRELATION` | No |
//! | [`EventError::Payload`] | `EVENT_PAYLOAD` | No |

use kernbus_types::{ErrorCode, EventId};
use thiserror::Error;

/// Event construction and decoding error.
///
/// # Example
///
/// ```
/// use kernbus_event::EventError;
/// use kernbus_types::ErrorCode;
///
/// let err = EventError::EmptyType;
/// assert_eq!(err.code(), "EVENT_EMPTY_TYPE");
/// assert!(!err.is_recoverable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The event type discriminator was empty.
    ///
    /// Routing and handler lookup both key on the type, so an empty type
    /// could never be delivered.
    #[error("event type must not be empty")]
    EmptyType,

    /// A response was requested for an event that carries no correlation id.
    #[error("event {0} has no correlation id to respond to")]
    MissingCorrelation(EventId),

    /// The payload could not be encoded or decoded.
    #[error("invalid event payload: {0}")]
    Payload(String),
}

impl ErrorCode for EventError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyType => "EVENT_EMPTY_TYPE",
            Self::MissingCorrelation(_) => "EVENT_MISSING_CORRELATION",
            Self::Payload(_) => "EVENT_PAYLOAD",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
