//! Content-addressed kernel snapshots.
//!
//! A snapshot captures everything a fresh kernel needs to continue an
//! execution: context, quota counters and loop-protection windows. The
//! queue is not captured; queued events stay with the live kernel.
//!
//! The content hash is SHA-256 over the canonical JSON of the execution id
//! and the state, so pausing twice with identical state yields the same
//! [`SnapshotId`] and the second append is a no-op. The timestamp and the
//! pause reason are not hashed.

use super::{ContextData, KernelError, LoopProtection, Quotas};
use kernbus_types::{ExecutionId, KernelId, SnapshotId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Restorable kernel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelSnapshotState {
    pub version: u32,
    pub kernel_id: KernelId,
    pub tenant_id: TenantId,
    pub context: ContextData,
    pub quotas: Quotas,
    pub loop_protection: LoopProtection,
}

/// A persisted kernel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub execution_id: ExecutionId,
    /// Epoch ms at capture.
    pub timestamp: i64,
    pub state: KernelSnapshotState,
    pub content_hash: SnapshotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashInput<'a> {
    execution_id: &'a ExecutionId,
    state: &'a KernelSnapshotState,
}

impl Snapshot {
    /// Captures `state` and computes its content hash.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if the state cannot be
    /// encoded.
    pub fn capture(
        execution_id: ExecutionId,
        state: KernelSnapshotState,
        timestamp: i64,
        reason: Option<String>,
    ) -> Result<Self, KernelError> {
        let content_hash = compute_hash(&execution_id, &state)?;
        Ok(Self {
            execution_id,
            timestamp,
            state,
            content_hash,
            reason,
        })
    }

    /// Recomputes the hash and compares it with `content_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if the state cannot be
    /// encoded.
    pub fn verify(&self) -> Result<bool, KernelError> {
        Ok(compute_hash(&self.execution_id, &self.state)? == self.content_hash)
    }

    /// Checks that this snapshot belongs to `execution` and `kernel`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::SnapshotMismatch`] naming the first field that
    /// differs.
    pub fn validate(&self, execution: &ExecutionId, kernel: &KernelId) -> Result<(), KernelError> {
        if &self.execution_id != execution {
            return Err(KernelError::snapshot_mismatch(
                "executionId",
                execution,
                &self.execution_id,
            ));
        }
        if &self.state.kernel_id != kernel {
            return Err(KernelError::snapshot_mismatch(
                "kernelId",
                kernel,
                &self.state.kernel_id,
            ));
        }
        if self.state.version != SNAPSHOT_VERSION {
            return Err(KernelError::snapshot_mismatch(
                "version",
                SNAPSHOT_VERSION,
                self.state.version,
            ));
        }
        Ok(())
    }
}

fn compute_hash(
    execution_id: &ExecutionId,
    state: &KernelSnapshotState,
) -> Result<SnapshotId, KernelError> {
    let value = serde_json::to_value(HashInput {
        execution_id,
        state,
    })?;
    let canonical = serde_json::to_vec(&canonicalize(value))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(SnapshotId::new(format!("{:x}", hasher.finalize())))
}

/// Rebuilds objects with sorted keys so the encoding does not depend on
/// map insertion order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
