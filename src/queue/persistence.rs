//! Durable JSON snapshot of the queue.
//!
//! Mutators never write the file themselves. They publish the latest
//! [`PersistedQueue`] into a `watch` channel while still holding the store's
//! write lock, and a single persister task drains it. Snapshots that arrive
//! faster than the disk can absorb are coalesced: only the newest one is
//! written (last writer wins).

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::PersistenceError;
use super::item::PersistedQueue;

/// File name of the snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "queue.json";

/// Location of the queue snapshot on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Snapshot stored as `queue.json` inside `data_dir`.
    #[must_use]
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SNAPSHOT_FILE_NAME),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] if the file exists but cannot be read
    /// and [`PersistenceError::Parse`] if it is not a valid snapshot.
    pub async fn load(&self) -> Result<Option<PersistedQueue>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(PersistenceError::io(&self.path, error)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes the snapshot through a temporary file and an atomic rename, so a
    /// crash mid-write never leaves a truncated `queue.json` behind.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the directory cannot be created or the
    /// file cannot be written.
    pub async fn save(&self, snapshot: &PersistedQueue) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(snapshot).map_err(PersistenceError::Serialize)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| PersistenceError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "queue snapshot saved");
        Ok(())
    }
}

/// Spawns the task that writes every published snapshot to `file`.
///
/// On `shutdown` any snapshot that was published but not yet written is
/// flushed before the task exits.
pub(crate) fn spawn_persister(
    file: SnapshotFile,
    mut snapshots: watch::Receiver<PersistedQueue>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    save_logged(&file, &snapshot).await;
                }
                () = shutdown.cancelled() => {
                    if snapshots.has_changed().unwrap_or(false) {
                        let snapshot = snapshots.borrow_and_update().clone();
                        save_logged(&file, &snapshot).await;
                    }
                    break;
                }
            }
        }
        info!(path = %file.path().display(), "queue persister stopped");
    })
}

async fn save_logged(file: &SnapshotFile, snapshot: &PersistedQueue) {
    if let Err(error) = file.save(snapshot).await {
        warn!(error = %error, "failed to persist queue snapshot; in-memory queue remains authoritative");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::queue::{FailedItem, Item};

    fn sample_snapshot() -> PersistedQueue {
        PersistedQueue {
            pending: vec![Item::new("https://example.com/a", "a.mp4", 10)],
            completed: vec![Item::new("https://example.com/b", "b.mp4", 20)],
            failed: vec![FailedItem {
                item: Item::new("https://example.com/c", "c.mp4", 0),
                error: "download form not found".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::in_dir(dir.path());
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_fields() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::in_dir(dir.path().join("nested"));
        let snapshot = sample_snapshot();

        file.save(&snapshot).await.unwrap();
        let loaded = file.load().await.unwrap().unwrap();

        assert_eq!(loaded, snapshot);
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::in_dir(dir.path());
        std::fs::write(file.path(), b"{not json").unwrap();

        let result = file.load().await;
        assert!(matches!(result, Err(PersistenceError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_foreign_timestamp_offsets_survive_reload_and_save() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::in_dir(dir.path());
        std::fs::write(
            file.path(),
            br#"{"pending":[{"id":"20240102150405.123","link":"https://example.com/x","name":"x","size":0,"addedAt":"2024-01-02T15:04:05+02:00"}]}"#,
        )
        .unwrap();
        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded.pending[0].id, "20240102150405.123");
        assert_eq!(loaded.pending[0].added_at.to_rfc3339(), "2024-01-02T15:04:05+02:00");
        assert!(loaded.failed.is_empty());

        file.save(&loaded).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(file.path()).unwrap()).unwrap();
        assert_eq!(written["pending"][0]["addedAt"], "2024-01-02T15:04:05+02:00");
        assert_eq!(file.load().await.unwrap().unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_is_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let file = SnapshotFile::in_dir(&blocker);

        let result = file.save(&sample_snapshot()).await;
        assert!(matches!(result, Err(PersistenceError::Io { .. })));
    }

    #[tokio::test]
    async fn test_persister_writes_latest_and_flushes_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::in_dir(dir.path());
        let (tx, rx) = watch::channel(PersistedQueue::default());
        let shutdown = CancellationToken::new();
        let handle = spawn_persister(file.clone(), rx, shutdown.clone());

        tx.send_replace(PersistedQueue::default());
        let snapshot = sample_snapshot();
        tx.send_replace(snapshot.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(file.load().await.unwrap().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_persister_survives_write_failures() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let (tx, rx) = watch::channel(PersistedQueue::default());
        let shutdown = CancellationToken::new();
        let handle = spawn_persister(SnapshotFile::in_dir(&blocker), rx, shutdown.clone());

        tx.send_replace(sample_snapshot());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "persister must keep running after a failed write");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
