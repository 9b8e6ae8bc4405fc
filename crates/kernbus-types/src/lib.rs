//! Core types for kernbus.
//!
//! This crate provides the identifier newtypes and the [`ErrorCode`]
//! contract shared by every other kernbus crate.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Contract Layer                            │
//! │  (stable, safe for handler authors to depend on)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  kernbus-types   : IDs, ErrorCode              ◄── HERE     │
//! │  kernbus-event   : Event, Priority, HandlerOutcome          │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Runtime Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  kernbus-runtime : queue, kernel, registry, router, persist │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Frontend Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  kernbus-cli     : diagnostics binary                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use kernbus_types::{CorrelationId, EventId, ExecutionId, KernelId};
//!
//! let execution = ExecutionId::new("acme", "job-1");
//! let kernel = KernelId::business();
//! let event = EventId::new();
//! let correlation = CorrelationId::new();
//!
//! assert_eq!(kernel.as_str(), "business");
//! assert_ne!(event, EventId::new());
//! assert_eq!(execution.to_string(), "acme/job-1");
//! let _ = correlation;
//! ```

mod error;
mod id;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{CorrelationId, EventId, ExecutionId, KernelId, SnapshotId, TenantId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_uniqueness() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn event_id_display() {
        let id = EventId::new();
        let display = id.to_string();
        assert!(display.starts_with("evt:"));
        assert!(display.contains(&id.uuid().to_string()));
    }

    #[test]
    fn correlation_id_display() {
        let id = CorrelationId::new();
        assert!(id.to_string().starts_with("corr:"));
        assert_eq!(id.uuid(), id.0);
    }

    #[test]
    fn execution_id_ordering_groups_by_tenant() {
        let a = ExecutionId::new("acme", "b");
        let b = ExecutionId::new("zeta", "a");
        assert!(a < b);
    }

    #[test]
    fn kernel_id_well_known_names() {
        assert!(KernelId::observability().is_observability());
        assert!(!KernelId::business().is_observability());
        assert_eq!(KernelId::new("business"), KernelId::business());
    }

    #[test]
    fn ids_serialize_transparently() {
        let tenant = TenantId::new("acme");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"acme\"");

        let snapshot = SnapshotId::new("abc123");
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, "\"abc123\"");
    }

    #[test]
    fn execution_id_roundtrip() {
        let id = ExecutionId::new("acme", "job-1");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["tenant"], "acme");
        assert_eq!(json["job"], "job-1");
        let back: ExecutionId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }
}
