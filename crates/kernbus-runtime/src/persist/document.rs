//! File-backed document persistor.
//!
//! Each snapshot is one JSON document named after its content hash:
//!
//! ```text
//! <connection>/<namespace>/<collection>/
//! ├── 3f2a…e1.json
//! ├── 9b07…4c.json
//! └── .9b07…4c.<uuid>.tmp   (in-progress write)
//! ```
//!
//! Writes go to a unique temp file which is then hard-linked to the final
//! name. Linking fails if the name exists, so concurrent appends of the
//! same hash store exactly one document and readers never see a partial
//! file.

use super::{
    expand_tilde, is_expired, sort_by_time, verify_integrity, AppendOutcome, PersistError,
    Persistor, PruneSchedule,
};
use crate::config::{PersistorBackend, PersistorConfig};
use crate::kernel::Snapshot;
use async_trait::async_trait;
use kernbus_types::{ExecutionId, SnapshotId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Snapshot store with one JSON document per snapshot.
#[derive(Debug)]
pub struct DocumentPersistor {
    root: PathBuf,
    ttl_ms: Option<u64>,
    prune_batch: usize,
    schedule: PruneSchedule,
}

impl DocumentPersistor {
    /// Opens (and creates if needed) the collection directory.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::InvalidConfig`] for an empty connection and
    /// [`PersistError::Io`] if the directory cannot be created.
    pub fn new(config: &PersistorConfig) -> Result<Self, PersistError> {
        if config.connection.is_empty() {
            return Err(PersistError::InvalidConfig(
                "document-store requires a connection path".into(),
            ));
        }

        let root = expand_tilde(Path::new(&config.connection))
            .join(&config.namespace)
            .join(&config.collection);

        // Create directory if needed (synchronously for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| PersistError::io(&root, e))?;
        }

        Ok(Self {
            root,
            ttl_ms: config.ttl_ms,
            prune_batch: config.batch_size.max(1),
            schedule: PruneSchedule::new(config.flush_interval_ms),
        })
    }

    /// Collection directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Document path for `hash`, or `None` if it is not a hex digest.
    fn document_path(&self, hash: &SnapshotId) -> Option<PathBuf> {
        let valid = !hash.as_str().is_empty()
            && hash.as_str().chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| self.root.join(format!("{}.json", hash.as_str())))
    }

    fn temp_path(&self, hash: &SnapshotId) -> PathBuf {
        self.root
            .join(format!(".{}.{}.tmp", hash.as_str(), uuid::Uuid::new_v4()))
    }

    async fn read_document(&self, path: &Path) -> Result<Snapshot, PersistError> {
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| PersistError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Reads every document, skipping temp files and unreadable entries.
    async fn scan(&self) -> Result<Vec<(PathBuf, Snapshot)>, PersistError> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| PersistError::io(&self.root, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistError::io(&self.root, e))?
        {
            let path = entry.path();

            // Skip non-JSON files and temp files
            if path.extension() != Some(std::ffi::OsStr::new("json")) {
                continue;
            }
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
            {
                continue;
            }

            match self.read_document(&path).await {
                Ok(snapshot) => found.push((path, snapshot)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(found)
    }

    async fn prune_now(&self, now_ms: i64) -> Result<usize, PersistError> {
        let mut removed = 0;
        for (path, snapshot) in self.scan().await? {
            if removed >= self.prune_batch {
                break;
            }
            if is_expired(&snapshot, self.ttl_ms, now_ms) {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    // a concurrent prune got there first
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(PersistError::io(&path, e)),
                }
            }
        }
        if removed > 0 {
            debug!(root = %self.root.display(), removed, "Pruned expired snapshots");
        }
        Ok(removed)
    }
}

#[async_trait]
impl Persistor for DocumentPersistor {
    async fn append(&self, snapshot: &Snapshot) -> Result<AppendOutcome, PersistError> {
        verify_integrity(snapshot)?;
        let hash = &snapshot.content_hash;
        let path = self
            .document_path(hash)
            .ok_or_else(|| PersistError::corrupted(hash.clone(), "hash is not a hex digest"))?;

        if self.ttl_ms.is_some() && self.schedule.due() {
            if let Err(e) = self.prune_now(chrono::Utc::now().timestamp_millis()).await {
                warn!(error = %e, "Snapshot prune failed");
            }
        }

        if path.exists() {
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = self.temp_path(hash);
        fs::write(&temp_path, &json)
            .await
            .map_err(|e| PersistError::io(&temp_path, e))?;

        let linked = fs::hard_link(&temp_path, &path).await;
        // the temp name is unique; losing it only leaves a hidden file behind
        let _ = fs::remove_file(&temp_path).await;

        match linked {
            Ok(()) => {
                debug!(hash = %hash, execution = %snapshot.execution_id, "Snapshot stored");
                Ok(AppendOutcome::Stored)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(AppendOutcome::AlreadyPresent),
            Err(e) => Err(PersistError::io(&path, e)),
        }
    }

    async fn has(&self, hash: &SnapshotId) -> Result<bool, PersistError> {
        Ok(self.document_path(hash).is_some_and(|p| p.exists()))
    }

    async fn get_by_hash(&self, hash: &SnapshotId) -> Result<Option<Snapshot>, PersistError> {
        let Some(path) = self.document_path(hash) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let snapshot = self.read_document(&path).await?;
        if &snapshot.content_hash != hash {
            return Err(PersistError::corrupted(
                hash.clone(),
                format!("document declares hash {}", snapshot.content_hash),
            ));
        }
        verify_integrity(&snapshot)?;
        Ok(Some(snapshot))
    }

    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<Snapshot>, PersistError> {
        let mut snapshots: Vec<Snapshot> = self
            .scan()
            .await?
            .into_iter()
            .map(|(_, snapshot)| snapshot)
            .filter(|snapshot| &snapshot.execution_id == execution_id)
            .collect();
        sort_by_time(&mut snapshots);
        Ok(snapshots)
    }

    async fn prune_expired(&self) -> Result<usize, PersistError> {
        self.prune_now(chrono::Utc::now().timestamp_millis()).await
    }

    fn backend(&self) -> PersistorBackend {
        PersistorBackend::DocumentStore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ContextData, KernelSnapshotState, LoopProtection, Quotas, SNAPSHOT_VERSION};
    use kernbus_types::{KernelId, TenantId};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

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
            Some("checkpoint".into()),
        )
        .unwrap()
    }

    fn store(temp: &TempDir, ttl_ms: Option<u64>) -> DocumentPersistor {
        DocumentPersistor::new(&PersistorConfig {
            backend: PersistorBackend::DocumentStore,
            connection: temp.path().to_string_lossy().into_owned(),
            ttl_ms,
            ..PersistorConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn layout_follows_namespace_and_collection() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, None);
        assert_eq!(store.root(), temp.path().join("kernbus").join("snapshots"));

        let snap = snapshot("job-1", 1, 5);
        store.append(&snap).await.unwrap();
        assert!(store
            .root()
            .join(format!("{}.json", snap.content_hash))
            .exists());
    }

    #[tokio::test]
    async fn append_is_idempotent_and_readable() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, None);
        let snap = snapshot("job-1", 1, 5);

        assert_eq!(store.append(&snap).await.unwrap(), AppendOutcome::Stored);
        assert_eq!(store.append(&snap).await.unwrap(), AppendOutcome::AlreadyPresent);
        assert!(store.has(&snap.content_hash).await.unwrap());
        assert_eq!(store.get_by_hash(&snap.content_hash).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn concurrent_appends_store_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp, None));
        let snap = snapshot("job-1", 1, 5);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let snap = snap.clone();
                tokio::spawn(async move { store.append(&snap).await.unwrap() })
            })
            .collect();

        let mut stored = 0;
        for task in tasks {
            if task.await.unwrap() == AppendOutcome::Stored {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);

        // no temp files left behind
        let names: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn load_reads_execution_in_time_order() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, None);
        store.append(&snapshot("job-1", 2, 300)).await.unwrap();
        store.append(&snapshot("job-1", 1, 100)).await.unwrap();
        store.append(&snapshot("job-2", 1, 200)).await.unwrap();
        std::fs::write(store.root().join("notes.txt"), "ignored").unwrap();

        let loaded = store.load(&ExecutionId::new("acme", "job-1")).await.unwrap();
        let times: Vec<i64> = loaded.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![100, 300]);
    }

    #[tokio::test]
    async fn non_hex_hash_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, None);
        let traversal = SnapshotId::new("../../etc/passwd");
        assert!(!store.has(&traversal).await.unwrap());
        assert!(store.get_by_hash(&traversal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tampered_document_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, None);
        let snap = snapshot("job-1", 1, 5);
        store.append(&snap).await.unwrap();

        let path = store.root().join(format!("{}.json", snap.content_hash));
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["state"]["context"]["planner"]["step"] = json!(42);
        std::fs::write(&path, doc.to_string()).unwrap();

        let err = store.get_by_hash(&snap.content_hash).await.unwrap_err();
        assert!(matches!(err, PersistError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn prune_removes_expired_documents() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp, Some(1_000));
        let now = chrono::Utc::now().timestamp_millis();
        let old = snapshot("job-1", 1, now - 10_000);
        let fresh = snapshot("job-1", 2, now);
        // write both without triggering the append-time prune on the old one
        store.append(&fresh).await.unwrap();
        store.append(&old).await.unwrap();

        assert_eq!(store.prune_expired().await.unwrap(), 1);
        assert!(!store.has(&old.content_hash).await.unwrap());
        assert!(store.has(&fresh.content_hash).await.unwrap());
    }

    #[test]
    fn empty_connection_is_invalid() {
        let err = DocumentPersistor::new(&PersistorConfig {
            backend: PersistorBackend::DocumentStore,
            ..PersistorConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, PersistError::InvalidConfig(_)));
    }
}
