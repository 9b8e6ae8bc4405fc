//! Request errors.
//!
//! The variants fall into disjoint families a caller can tell apart:
//!
//! | Family | Variants | Meaning |
//! |--------|----------|---------|
//! | no response | `Timeout` | nothing arrived before the deadline |
//! | business error | `Remote` | a response arrived carrying an error |
//! | fail fast | `KernelFailed`, `KernelClosed` | a kernel on the path stopped |
//! | transport | `Backpressure`, `UnknownKernel`, `Shutdown` | the request was not delivered |

use crate::kernel::{KernelError, KernelFault, KernelStatus};
use crate::queue::QueueError;
use crate::registry::RegistryError;
use kernbus_event::{ErrorPayload, EventError};
use kernbus_types::{CorrelationId, ErrorCode, KernelId};
use thiserror::Error;

/// Request error type.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No response before the deadline.
    #[error("request {correlation_id} timed out after {timeout_ms}ms")]
    Timeout {
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    /// The response carried a business error.
    #[error("remote error: {0}")]
    Remote(ErrorPayload),

    /// A kernel on the request path failed.
    #[error("kernel {kernel} failed: {fault}")]
    KernelFailed { kernel: KernelId, fault: KernelFault },

    /// A kernel on the request path completed without a fault.
    #[error("kernel {kernel} is {status}")]
    KernelClosed {
        kernel: KernelId,
        status: KernelStatus,
    },

    /// The request kernel's queue refused the event.
    #[error(transparent)]
    Backpressure(QueueError),

    #[error("unknown kernel: {0}")]
    UnknownKernel(KernelId),

    /// The router or its registry shut down while waiting.
    #[error("router shut down")]
    Shutdown,

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Kernel(KernelError),
}

impl RequestError {
    /// Returns `true` for [`Timeout`](Self::Timeout).
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The kernel fault behind a fail-fast error.
    #[must_use]
    pub fn fault(&self) -> Option<&KernelFault> {
        match self {
            Self::KernelFailed { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

impl From<KernelError> for RequestError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Queue(e) => Self::Backpressure(e),
            KernelError::Halted {
                kernel,
                status,
                fault,
            } => match fault {
                Some(fault) => Self::KernelFailed { kernel, fault },
                None => Self::KernelClosed { kernel, status },
            },
            KernelError::QuotaExceeded { kernel, limit } => Self::KernelFailed {
                kernel,
                fault: KernelFault::QuotaExceeded { limit },
            },
            KernelError::LoopDetected {
                kernel,
                event_type,
                count,
                window_ms,
            } => Self::KernelFailed {
                kernel,
                fault: KernelFault::LoopDetected {
                    event_type,
                    count,
                    window_ms,
                },
            },
            other => Self::Kernel(other),
        }
    }
}

impl From<RegistryError> for RequestError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownKernel(id) => Self::UnknownKernel(id),
            RegistryError::Dropped => Self::Shutdown,
            RegistryError::Kernel(e) => e.into(),
            RegistryError::Event(e) => Self::Event(e),
        }
    }
}

impl ErrorCode for RequestError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "REQUEST_TIMEOUT",
            Self::Remote(_) => "REQUEST_REMOTE",
            Self::KernelFailed { .. } => "REQUEST_KERNEL_FAILED",
            Self::KernelClosed { .. } => "REQUEST_KERNEL_CLOSED",
            Self::Backpressure(_) => "REQUEST_BACKPRESSURE",
            Self::UnknownKernel(_) => "REQUEST_UNKNOWN_KERNEL",
            Self::Shutdown => "REQUEST_SHUTDOWN",
            Self::Event(e) => e.code(),
            Self::Kernel(e) => e.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backpressure(_))
    }
}
