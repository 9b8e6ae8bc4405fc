//! Persistor errors.

use kernbus_types::{ErrorCode, SnapshotId};
use std::path::PathBuf;
use thiserror::Error;

/// Persistor error type.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored or submitted content does not match its hash.
    #[error("snapshot {hash} is corrupted: {reason}")]
    Corrupted { hash: SnapshotId, reason: String },

    /// Backend configuration is unusable.
    #[error("invalid persistor configuration: {0}")]
    InvalidConfig(String),
}

impl PersistError {
    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(hash: SnapshotId, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            hash,
            reason: reason.into(),
        }
    }
}

impl ErrorCode for PersistError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "PERSIST_IO",
            Self::Serialization(_) => "PERSIST_SERIALIZATION",
            Self::Corrupted { .. } => "PERSIST_CORRUPTED",
            Self::InvalidConfig(_) => "PERSIST_INVALID_CONFIG",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernbus_types::assert_error_code;

    #[test]
    fn codes_follow_convention() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_error_code(&PersistError::io("/data", io), "PERSIST_");
        assert_error_code(&PersistError::corrupted(SnapshotId::new("ab"), "hash"), "PERSIST_");
        assert_error_code(&PersistError::InvalidConfig("x".into()), "PERSIST_");
    }

    #[test]
    fn io_is_recoverable() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(PersistError::io("/data", io).is_recoverable());
        assert!(!PersistError::InvalidConfig("x".into()).is_recoverable());
    }
}
