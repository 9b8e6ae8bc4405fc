//! In-memory persistor.

use super::{
    is_expired, sort_by_time, verify_integrity, AppendOutcome, PersistError, Persistor,
    PruneSchedule,
};
use crate::config::{PersistorBackend, PersistorConfig};
use crate::kernel::Snapshot;
use async_trait::async_trait;
use kernbus_types::{ExecutionId, SnapshotId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct Entries {
    by_hash: HashMap<SnapshotId, Snapshot>,
    by_execution: HashMap<ExecutionId, Vec<SnapshotId>>,
}

/// Process-local snapshot store.
///
/// Lost on exit; use it for tests, demos and single-process deployments
/// that only need pause/resume within one run.
#[derive(Debug)]
pub struct MemoryPersistor {
    entries: RwLock<Entries>,
    ttl_ms: Option<u64>,
    prune_batch: usize,
    schedule: PruneSchedule,
}

impl Default for MemoryPersistor {
    fn default() -> Self {
        Self::from_config(&PersistorConfig::default())
    }
}

impl MemoryPersistor {
    /// Creates an empty store without TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store using the TTL and prune settings of `config`.
    #[must_use]
    pub fn from_config(config: &PersistorConfig) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            ttl_ms: config.ttl_ms,
            prune_batch: config.batch_size.max(1),
            schedule: PruneSchedule::new(config.flush_interval_ms),
        }
    }

    /// Stored snapshot count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().by_hash.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_now(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.write();
        let expired: Vec<SnapshotId> = entries
            .by_hash
            .iter()
            .filter(|(_, snap)| is_expired(snap, self.ttl_ms, now_ms))
            .map(|(hash, _)| hash.clone())
            .take(self.prune_batch)
            .collect();

        for hash in &expired {
            if let Some(snap) = entries.by_hash.remove(hash) {
                if let Some(list) = entries.by_execution.get_mut(&snap.execution_id) {
                    list.retain(|h| h != hash);
                    if list.is_empty() {
                        entries.by_execution.remove(&snap.execution_id);
                    }
                }
            }
        }
        expired.len()
    }
}

#[async_trait]
impl Persistor for MemoryPersistor {
    async fn append(&self, snapshot: &Snapshot) -> Result<AppendOutcome, PersistError> {
        verify_integrity(snapshot)?;

        if self.ttl_ms.is_some() && self.schedule.due() {
            self.prune_now(chrono::Utc::now().timestamp_millis());
        }

        let mut entries = self.entries.write();
        if entries.by_hash.contains_key(&snapshot.content_hash) {
            debug!(hash = %snapshot.content_hash, "Snapshot already stored");
            return Ok(AppendOutcome::AlreadyPresent);
        }

        entries
            .by_execution
            .entry(snapshot.execution_id.clone())
            .or_default()
            .push(snapshot.content_hash.clone());
        entries
            .by_hash
            .insert(snapshot.content_hash.clone(), snapshot.clone());
        debug!(hash = %snapshot.content_hash, execution = %snapshot.execution_id, "Snapshot stored");
        Ok(AppendOutcome::Stored)
    }

    async fn has(&self, hash: &SnapshotId) -> Result<bool, PersistError> {
        Ok(self.entries.read().by_hash.contains_key(hash))
    }

    async fn get_by_hash(&self, hash: &SnapshotId) -> Result<Option<Snapshot>, PersistError> {
        Ok(self.entries.read().by_hash.get(hash).cloned())
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<Snapshot>, PersistError> {
        let entries = self.entries.read();
        let mut snapshots: Vec<Snapshot> = entries
            .by_execution
            .get(execution_id)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| entries.by_hash.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default();
        sort_by_time(&mut snapshots);
        Ok(snapshots)
    }

    async fn prune_expired(&self) -> Result<usize, PersistError> {
        Ok(self.prune_now(chrono::Utc::now().timestamp_millis()))
    }

    fn backend(&self) -> PersistorBackend {
        PersistorBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ContextData, KernelSnapshotState, LoopProtection, Quotas, SNAPSHOT_VERSION};
    use kernbus_types::{KernelId, TenantId};
    use serde_json::json;

    fn snapshot(job: &str, step: i64, timestamp: i64) -> Snapshot {
        let mut context = ContextData::new();
        context.set("planner", "step", json!(step));
        Snapshot::capture(
            ExecutionId::new("acme", job),
            KernelSnapshotState {
                version: SNAPSHOT_VERSION,
                kernel_id: KernelId::business(),
                tenant_id: TenantId::new("acme"),
                context,
                quotas: Quotas::new(100, 10_000),
                loop_protection: LoopProtection::new(1_000, 10),
            },
            timestamp,
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = MemoryPersistor::new();
        let snap = snapshot("job-1", 1, 10);

        assert_eq!(store.append(&snap).await.unwrap(), AppendOutcome::Stored);
        assert_eq!(store.append(&snap).await.unwrap(), AppendOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
        assert!(store.has(&snap.content_hash).await.unwrap());
        assert_eq!(store.get_by_hash(&snap.content_hash).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn load_orders_by_timestamp_and_filters_execution() {
        let store = MemoryPersistor::new();
        store.append(&snapshot("job-1", 2, 200)).await.unwrap();
        store.append(&snapshot("job-1", 1, 100)).await.unwrap();
        store.append(&snapshot("job-2", 1, 50)).await.unwrap();

        let loaded = store.load(&ExecutionId::new("acme", "job-1")).await.unwrap();
        let times: Vec<i64> = loaded.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![100, 200]);

        assert!(store
            .load(&ExecutionId::new("acme", "job-9"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn append_rejects_tampered_snapshot() {
        let store = MemoryPersistor::new();
        let mut snap = snapshot("job-1", 1, 0);
        snap.state.quotas.consumed_events = 7;

        let err = store.append(&snap).await.unwrap_err();
        assert!(matches!(err, PersistError::Corrupted { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_hash_is_none() {
        let store = MemoryPersistor::new();
        let missing = SnapshotId::new("00");
        assert!(!store.has(&missing).await.unwrap());
        assert!(store.get_by_hash(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_removes_expired() {
        let config = PersistorConfig {
            ttl_ms: Some(60_000),
            ..PersistorConfig::default()
        };
        let store = MemoryPersistor::from_config(&config);
        let now = chrono::Utc::now().timestamp_millis();
        store.append(&snapshot("job-1", 1, now - 120_000)).await.unwrap();
        store.append(&snapshot("job-1", 2, now)).await.unwrap();

        assert_eq!(store.prune_expired().await.unwrap(), 1);
        let left = store.load(&ExecutionId::new("acme", "job-1")).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp, now);
    }
}
