//! Registry errors.

use crate::kernel::KernelError;
use kernbus_event::EventError;
use kernbus_types::{ErrorCode, KernelId};
use thiserror::Error;

/// Registry error type.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No kernel with this id in the registry.
    #[error("unknown kernel: {0}")]
    UnknownKernel(KernelId),

    /// The registry behind an emitter was dropped.
    #[error("registry dropped")]
    Dropped,

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl ErrorCode for RegistryError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownKernel(_) => "REGISTRY_UNKNOWN_KERNEL",
            Self::Dropped => "REGISTRY_DROPPED",
            Self::Kernel(e) => e.code(),
            Self::Event(e) => e.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Kernel(e) => e.is_recoverable(),
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
                RegistryError::UnknownKernel(KernelId::new("audit")),
                RegistryError::Dropped,
            ],
            "REGISTRY_",
        );
    }

    #[test]
    fn wrapped_errors_keep_their_code() {
        assert_eq!(RegistryError::from(EventError::EmptyType).code(), "EVENT_EMPTY_TYPE");
    }
}
