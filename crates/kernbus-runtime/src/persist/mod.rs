//! Snapshot persistence.
//!
//! # Contract
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | `append` | stores a snapshot; appending an existing hash is a no-op |
//! | `has` | whether a hash is stored |
//! | `get_by_hash` | the stored snapshot, or `None` |
//! | `load` | all snapshots of an execution, ordered by timestamp |
//!
//! Snapshots are immutable once stored. Idempotency is keyed on the
//! content hash alone, so concurrent appends of the same snapshot converge
//! on one stored copy.
//!
//! # Backends
//!
//! ```text
//! PersistorConfig.backend
//!   ├── memory          → MemoryPersistor   (process-local, tests, demos)
//!   └── document-store  → DocumentPersistor (<connection>/<namespace>/<collection>/<hash>.json)
//! ```

mod document;
mod error;
mod memory;

pub use document::DocumentPersistor;
pub use error::PersistError;
pub use memory::MemoryPersistor;

use crate::config::{PersistorBackend, PersistorConfig};
use crate::kernel::Snapshot;
use async_trait::async_trait;
use kernbus_types::{ExecutionId, SnapshotId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of [`Persistor::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Newly stored.
    Stored,
    /// A snapshot with this hash was already stored.
    AlreadyPresent,
}

/// Durable store for kernel snapshots.
#[async_trait]
pub trait Persistor: Send + Sync + std::fmt::Debug {
    /// Stores `snapshot` unless its hash is already present.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Corrupted`] if the snapshot's content does
    /// not match its hash, or a backend error.
    async fn append(&self, snapshot: &Snapshot) -> Result<AppendOutcome, PersistError>;

    /// Returns `true` if `hash` is stored.
    async fn has(&self, hash: &SnapshotId) -> Result<bool, PersistError>;

    /// Returns the snapshot stored under `hash`.
    async fn get_by_hash(&self, hash: &SnapshotId) -> Result<Option<Snapshot>, PersistError>;

    /// Returns all snapshots of `execution_id`, oldest first.
    async fn load(&self, execution_id: &ExecutionId) -> Result<Vec<Snapshot>, PersistError>;

    /// Removes snapshots older than the configured TTL. Returns how many
    /// were removed.
    async fn prune_expired(&self) -> Result<usize, PersistError> {
        Ok(0)
    }

    /// Backend kind.
    fn backend(&self) -> PersistorBackend;
}

/// Builds the backend selected by `config`.
///
/// # Errors
///
/// Returns [`PersistError`] if the document-store directory cannot be
/// created or the connection is empty.
pub fn from_config(config: &PersistorConfig) -> Result<Arc<dyn Persistor>, PersistError> {
    match config.backend {
        PersistorBackend::Memory => Ok(Arc::new(MemoryPersistor::from_config(config))),
        PersistorBackend::DocumentStore => Ok(Arc::new(DocumentPersistor::new(config)?)),
    }
}

/// Rejects snapshots whose content does not hash to `content_hash`.
fn verify_integrity(snapshot: &Snapshot) -> Result<(), PersistError> {
    match snapshot.verify() {
        Ok(true) => Ok(()),
        Ok(false) => Err(PersistError::corrupted(
            snapshot.content_hash.clone(),
            "content does not match hash",
        )),
        Err(e) => Err(PersistError::corrupted(
            snapshot.content_hash.clone(),
            e.to_string(),
        )),
    }
}

fn is_expired(snapshot: &Snapshot, ttl_ms: Option<u64>, now_ms: i64) -> bool {
    ttl_ms.is_some_and(|ttl| {
        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        now_ms.saturating_sub(snapshot.timestamp) > ttl
    })
}

fn sort_by_time(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.content_hash.cmp(&b.content_hash))
    });
}

/// Rate limit for TTL pruning piggybacked on appends.
#[derive(Debug)]
struct PruneSchedule {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl PruneSchedule {
    fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            last: Mutex::new(None),
        }
    }

    /// Returns `true` at most once per interval.
    fn due(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(at) if now.duration_since(at) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Expands `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_selects_backend() {
        let memory = from_config(&PersistorConfig::default()).unwrap();
        assert_eq!(memory.backend(), PersistorBackend::Memory);

        let temp = tempfile::TempDir::new().unwrap();
        let config = PersistorConfig {
            backend: PersistorBackend::DocumentStore,
            connection: temp.path().to_string_lossy().into_owned(),
            ..PersistorConfig::default()
        };
        let document = from_config(&config).unwrap();
        assert_eq!(document.backend(), PersistorBackend::DocumentStore);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_schedule_fires_once_per_interval() {
        let schedule = PruneSchedule::new(1_000);
        assert!(schedule.due());
        assert!(!schedule.due());
        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(schedule.due());
    }

    #[test]
    fn expand_tilde_without_tilde() {
        let path = PathBuf::from("/var/lib/kernbus");
        assert_eq!(expand_tilde(&path), path);
    }
}
