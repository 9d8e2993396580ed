//! Error types for queue operations.

use std::path::PathBuf;

use thiserror::Error;

use super::Direction;

/// Errors returned by [`QueueStore`](super::QueueStore) mutators.
///
/// Every variant is a no-op failure: the in-memory queue is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The id is absent from the sequence(s) the operation searches.
    #[error("queue item not found: id {0}")]
    ItemNotFound(String),

    /// An item with this id is already in the queue.
    #[error("queue item already exists: id {0}")]
    AlreadyQueued(String),

    /// The item is already at the boundary of Pending in the requested direction.
    #[error("cannot move item {id} {direction}: already at the boundary")]
    CannotMove {
        /// The item that was asked to move.
        id: String,
        /// Requested direction.
        direction: Direction,
    },
}

impl QueueError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::ItemNotFound(id.into())
    }
}

/// Errors reading or writing the queue snapshot.
///
/// These are logged and never propagated past the store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error reading, writing, or renaming the snapshot.
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file exists but is not a valid queue document.
    #[error("invalid queue snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize queue snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
