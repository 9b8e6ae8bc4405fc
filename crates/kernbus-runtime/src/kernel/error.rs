//! Kernel errors.

use super::{KernelFault, KernelStatus, QuotaLimit};
use crate::persist::PersistError;
use crate::queue::QueueError;
use kernbus_types::{CorrelationId, ErrorCode, KernelId, SnapshotId, TenantId};
use std::fmt::Display;
use thiserror::Error;

/// Kernel error type.
///
/// Wrapped queue and persistor errors keep their own codes.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The requested status change is not allowed.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: KernelStatus,
        to: KernelStatus,
    },

    /// The kernel is terminal and takes no more work.
    #[error("kernel {kernel} is {status}")]
    Halted {
        kernel: KernelId,
        status: KernelStatus,
        fault: Option<KernelFault>,
    },

    /// A quota was exceeded; the kernel is now failed.
    #[error("kernel {kernel} quota exceeded: {limit}")]
    QuotaExceeded { kernel: KernelId, limit: QuotaLimit },

    /// Loop protection tripped; the kernel is now failed.
    #[error("kernel {kernel} loop detected: {count} '{event_type}' events within {window_ms}ms")]
    LoopDetected {
        kernel: KernelId,
        event_type: String,
        count: usize,
        window_ms: u64,
    },

    /// The event is stamped with another tenant.
    #[error("kernel {kernel} belongs to tenant {expected}, event is for {actual}")]
    TenantMismatch {
        kernel: KernelId,
        expected: TenantId,
        actual: TenantId,
    },

    /// A waiter already exists for this key.
    #[error("waiter already registered for '{event_type}' / {correlation_id}")]
    DuplicateWaiter {
        event_type: String,
        correlation_id: CorrelationId,
    },

    /// No snapshot with this hash.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// The snapshot belongs to another execution, kernel or format.
    #[error("snapshot mismatch on {field}: expected {expected}, got {actual}")]
    SnapshotMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// Stored content does not match its hash.
    #[error("snapshot {0} failed integrity check")]
    SnapshotCorrupted(SnapshotId),

    /// State could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl KernelError {
    pub(crate) fn snapshot_mismatch(
        field: &'static str,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        Self::SnapshotMismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Maps a fault to the error reported to the caller that tripped it.
    pub(crate) fn from_fault(kernel: &KernelId, fault: &KernelFault) -> Self {
        match fault {
            KernelFault::QuotaExceeded { limit } => Self::QuotaExceeded {
                kernel: kernel.clone(),
                limit: limit.clone(),
            },
            KernelFault::LoopDetected {
                event_type,
                count,
                window_ms,
            } => Self::LoopDetected {
                kernel: kernel.clone(),
                event_type: event_type.clone(),
                count: *count,
                window_ms: *window_ms,
            },
            KernelFault::Failed { .. } => Self::Halted {
                kernel: kernel.clone(),
                status: KernelStatus::Failed,
                fault: Some(fault.clone()),
            },
        }
    }

    /// The fault behind this error, if the kernel failed.
    #[must_use]
    pub fn fault(&self) -> Option<KernelFault> {
        match self {
            Self::QuotaExceeded { limit, .. } => Some(KernelFault::QuotaExceeded {
                limit: limit.clone(),
            }),
            Self::LoopDetected {
                event_type,
                count,
                window_ms,
                ..
            } => Some(KernelFault::LoopDetected {
                event_type: event_type.clone(),
                count: *count,
                window_ms: *window_ms,
            }),
            Self::Halted { fault, .. } => fault.clone(),
            _ => None,
        }
    }
}

impl ErrorCode for KernelError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "KERNEL_INVALID_TRANSITION",
            Self::Halted { .. } => "KERNEL_HALTED",
            Self::QuotaExceeded { .. } => "KERNEL_QUOTA_EXCEEDED",
            Self::LoopDetected { .. } => "KERNEL_LOOP_DETECTED",
            Self::TenantMismatch { .. } => "KERNEL_TENANT_MISMATCH",
            Self::DuplicateWaiter { .. } => "KERNEL_DUPLICATE_WAITER",
            Self::SnapshotNotFound(_) => "KERNEL_SNAPSHOT_NOT_FOUND",
            Self::SnapshotMismatch { .. } => "KERNEL_SNAPSHOT_MISMATCH",
            Self::SnapshotCorrupted(_) => "KERNEL_SNAPSHOT_CORRUPTED",
            Self::Serialization(_) => "KERNEL_SERIALIZATION",
            Self::Queue(e) => e.code(),
            Self::Persist(e) => e.code(),
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Queue(e) => e.is_recoverable(),
            Self::Persist(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::{assert_error_codes, EventId};

    #[test]
    fn codes_follow_convention() {
        let kernel = KernelId::business();
        assert_error_codes(
            &[
                KernelError::InvalidTransition {
                    from: KernelStatus::Completed,
                    to: KernelStatus::Running,
                },
                KernelError::Halted {
                    kernel: kernel.clone(),
                    status: KernelStatus::Failed,
                    fault: None,
                },
                KernelError::TenantMismatch {
                    kernel: kernel.clone(),
                    expected: TenantId::new("acme"),
                    actual: TenantId::new("globex"),
                },
                KernelError::SnapshotNotFound(SnapshotId::new("abc")),
                KernelError::snapshot_mismatch("kernelId", "business", "observability"),
                KernelError::SnapshotCorrupted(SnapshotId::new("abc")),
                KernelError::from_fault(
                    &kernel,
                    &KernelFault::QuotaExceeded {
                        limit: QuotaLimit::Events { max: 5, consumed: 6 },
                    },
                ),
            ],
            "KERNEL_",
        );
    }

    #[test]
    fn wrapped_errors_keep_their_code() {
        let err = KernelError::from(QueueError::Backpressure {
            event_id: EventId::new(),
            policy: crate::config::BackpressurePolicy::Reject,
            depth: 1,
            cause: crate::queue::PressureCause::Depth { high_watermark: 1 },
        });
        assert_eq!(err.code(), "QUEUE_BACKPRESSURE");
        assert!(err.is_recoverable());
    }

    #[test]
    fn fault_roundtrips_through_error() {
        let kernel = KernelId::business();
        let fault = KernelFault::LoopDetected {
            event_type: "ping".into(),
            count: 11,
            window_ms: 100,
        };
        let err = KernelError::from_fault(&kernel, &fault);
        assert_eq!(err.code(), "KERNEL_LOOP_DETECTED");
        assert_eq!(err.fault(), Some(fault));
    }
}
