//! Engine errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`EngineError::ShutDown`] | `ENGINE_SHUT_DOWN` | No |
//! | [`EngineError::AlreadyStarted`] | `ENGINE_ALREADY_STARTED` | No |
//! | [`EngineError::NoRuntime`] | `ENGINE_NO_RUNTIME` | No |
//! | [`EngineError::Config`] | `CONFIG_*` | per source |
//! | [`EngineError::Persist`] | `PERSIST_*` | per source |
//!
//! Wrapped errors keep the code of the layer that produced them.

use crate::config::ConfigError;
use crate::persist::PersistError;
use kernbus_types::ErrorCode;
use thiserror::Error;

/// Engine error type.
///
/// # Example
///
/// ```
/// use kernbus_runtime::EngineError;
/// use kernbus_types::ErrorCode;
///
/// let err = EngineError::ShutDown;
/// assert_eq!(err.code(), "ENGINE_SHUT_DOWN");
/// assert!(!err.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine was shut down and accepts no new executions.
    #[error("engine is shut down")]
    ShutDown,

    /// Background loops are already running.
    #[error("engine already started")]
    AlreadyStarted,

    /// `start` was called outside a Tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::ShutDown => "ENGINE_SHUT_DOWN",
            Self::AlreadyStarted => "ENGINE_ALREADY_STARTED",
            Self::NoRuntime => "ENGINE_NO_RUNTIME",
            Self::Config(e) => e.code(),
            Self::Persist(e) => e.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(e) => e.is_recoverable(),
            Self::Persist(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::assert_error_codes;

    #[test]
    fn codes_follow_convention() {
        assert_error_codes(
            &[
                EngineError::ShutDown,
                EngineError::AlreadyStarted,
                EngineError::NoRuntime,
            ],
            "ENGINE_",
        );
    }

    #[test]
    fn wrapped_errors_keep_their_codes() {
        let err = EngineError::from(ConfigError::invalid("queue.batch_size", "must be > 0"));
        assert!(err.code().starts_with("CONFIG_"));

        let err = EngineError::from(PersistError::InvalidConfig("empty".into()));
        assert_eq!(err.code(), "PERSIST_INVALID_CONFIG");
    }
}
