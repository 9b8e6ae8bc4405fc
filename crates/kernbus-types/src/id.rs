//! Identifier types for kernbus.
//!
//! Event and correlation identifiers are UUID-based so they stay unique
//! across processes. Tenant, job and kernel identifiers are human-chosen
//! names because they appear in routing tables, logs and snapshot keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of an event.
///
/// Assigned once at event creation. The EventQueue uses it as the
/// deduplication key, so it must stay unique within the dedup window.
///
/// # Example
///
/// ```
/// use kernbus_types::EventId;
///
/// let a = EventId::new();
/// let b = EventId::new();
/// assert_ne!(a, b);
/// assert!(a.to_string().starts_with("evt:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random [`EventId`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", self.0)
    }
}

/// Opaque token linking a request event to its response event.
///
/// Generated by the RequestRouter for every `request()` call. It is
/// deliberately not `Default`: a correlation id that nobody waits for is a
/// bug, so creation must be explicit.
///
/// # Example
///
/// ```
/// use kernbus_types::CorrelationId;
///
/// let id = CorrelationId::new();
/// assert!(id.to_string().starts_with("corr:"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Creates a new random [`CorrelationId`].
    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr:{}", self.0)
    }
}

/// Tenant identifier.
///
/// Tenant isolation is structural: every tenant gets its own Kernel
/// instances, so this id only namespaces state and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tenant name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Composite identity of one tenant's job.
///
/// Displays as `tenant/job`. Kernels, snapshots and the Engine's execution
/// map are all keyed by this value.
///
/// # Example
///
/// ```
/// use kernbus_types::ExecutionId;
///
/// let id = ExecutionId::new("acme", "job-7");
/// assert_eq!(id.to_string(), "acme/job-7");
/// assert_eq!(id.tenant().as_str(), "acme");
/// assert_eq!(id.job(), "job-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId {
    tenant: TenantId,
    job: String,
}

impl ExecutionId {
    /// Creates an execution id from tenant and job names.
    #[must_use]
    pub fn new(tenant: impl Into<TenantId>, job: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            job: job.into(),
        }
    }

    /// Returns the owning tenant.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the job name.
    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.job)
    }
}

/// Name of a Kernel inside a KernelRegistry.
///
/// Every registry owns at least the [`business`](Self::business) and
/// [`observability`](Self::observability) kernels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelId(String);

impl KernelId {
    /// Name of the kernel carrying agent/business traffic.
    pub const BUSINESS: &'static str = "business";

    /// Name of the kernel carrying telemetry traffic.
    pub const OBSERVABILITY: &'static str = "observability";

    /// Creates a kernel id from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The business kernel id.
    #[must_use]
    pub fn business() -> Self {
        Self::new(Self::BUSINESS)
    }

    /// The observability kernel id.
    #[must_use]
    pub fn observability() -> Self {
        Self::new(Self::OBSERVABILITY)
    }

    /// Returns the kernel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the observability kernel.
    #[must_use]
    pub fn is_observability(&self) -> bool {
        self.0 == Self::OBSERVABILITY
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a persisted snapshot: the hex content hash of its state.
///
/// Two snapshots of identical state share a [`SnapshotId`], which is what
/// makes Persistor appends idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Wraps a content hash.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Returns the content hash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
