//! Queue store: the single source of truth for download jobs.
//!
//! Items move through four disjoint sequences:
//! Pending → Downloading → Completed | Failed.
//!
//! # Overview
//!
//! - [`QueueStore`] - Owns the live [`Queue`] and serializes every mutation
//! - [`Item`] / [`FailedItem`] - Queue entries
//! - [`SnapshotFile`] - Durable JSON snapshot (`queue.json`)
//! - [`QueueError`] - "not found" style no-op failures
//!
//! # Example
//!
//! ```no_run
//! use fsqd_core::queue::{Direction, Item, QueueStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = QueueStore::open("./data").await;
//! let item = Item::new("https://example.com/video/1", "clip.mp4", 0);
//! let id = item.id.clone();
//! store.add_pending_item(item)?;
//! store.move_pending_item(&id, Direction::Up).ok();
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod item;
mod persistence;

pub use error::{PersistenceError, QueueError};
pub use item::{Direction, FailedItem, Item, PersistedQueue, Queue, next_item_id};
pub use persistence::{SNAPSHOT_FILE_NAME, SnapshotFile};

use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Thread-safe owner of the download queue.
///
/// All mutators take the write lock, mutate, and publish the resulting
/// snapshot before releasing it, so readers never observe a half-moved item
/// and snapshots reach the persister in mutation order. The lock is never
/// held across an `.await`.
#[derive(Debug)]
pub struct QueueStore {
    state: RwLock<Queue>,
    snapshots: Option<watch::Sender<PersistedQueue>>,
    persister: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl QueueStore {
    /// Opens the store backed by `data_dir/queue.json`.
    ///
    /// A missing or unreadable snapshot starts an empty queue; this never fails.
    /// Must be called within a Tokio runtime (spawns the persister task).
    #[instrument(skip_all, fields(data_dir = %data_dir.as_ref().display()))]
    pub async fn open(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        if let Err(error) = tokio::fs::create_dir_all(data_dir).await {
            warn!(error = %error, "failed to create data directory");
        }

        let file = SnapshotFile::in_dir(data_dir);
        let queue = match file.load().await {
            Ok(Some(persisted)) => {
                let queue = Queue::from(persisted);
                info!(
                    pending = queue.pending.len(),
                    completed = queue.completed.len(),
                    failed = queue.failed.len(),
                    "queue snapshot loaded"
                );
                queue
            }
            Ok(None) => {
                info!("no queue snapshot found, starting empty");
                Queue::default()
            }
            Err(error) => {
                warn!(error = %error, "failed to load queue snapshot, starting empty");
                Queue::default()
            }
        };

        let (tx, rx) = watch::channel(queue.to_persisted());
        let shutdown = CancellationToken::new();
        let persister = persistence::spawn_persister(file, rx, shutdown.clone());

        Self {
            state: RwLock::new(queue),
            snapshots: Some(tx),
            persister: Mutex::new(Some(persister)),
            shutdown,
        }
    }

    /// Creates a store with no durable snapshot.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Queue::default()),
            snapshots: None,
            persister: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops the persister after flushing the last published snapshot.
    ///
    /// Mutations made after shutdown still apply in memory but are no longer
    /// written to disk.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .persister
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(error = %error, "queue persister task failed");
            }
        }
    }

    /// Returns a copy of the full live queue.
    #[must_use]
    pub fn get_queue(&self) -> Queue {
        self.read().clone()
    }

    /// Returns a copy of the item at the head of Pending, if any.
    #[must_use]
    pub fn first_pending(&self) -> Option<Item> {
        self.read().pending.first().cloned()
    }

    /// Appends `item` to the tail of Pending.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyQueued`] if the id is already present in
    /// any sequence.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub fn add_pending_item(&self, item: Item) -> Result<()> {
        self.mutate(|queue| {
            if contains_id(queue, &item.id) {
                return Err(QueueError::AlreadyQueued(item.id.clone()));
            }
            debug!(link = %item.link, "item added to pending");
            queue.pending.push(item);
            Ok(())
        })
    }

    /// Removes an item from Pending, Completed or Failed, searched in that order.
    ///
    /// Downloading is never searched; in-flight items are stopped through
    /// cancellation instead.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if no searched sequence holds `id`.
    #[instrument(skip(self))]
    pub fn remove_item_by_id(&self, id: &str) -> Result<Item> {
        self.mutate(|queue| {
            if let Some(item) = take_by_id(&mut queue.pending, id) {
                return Ok(item);
            }
            if let Some(item) = take_by_id(&mut queue.completed, id) {
                return Ok(item);
            }
            if let Some(index) = queue.failed.iter().position(|f| f.item.id == id) {
                return Ok(queue.failed.remove(index).item);
            }
            Err(QueueError::not_found(id))
        })
    }

    /// Swaps a pending item with its neighbour in `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if `id` is not pending and
    /// [`QueueError::CannotMove`] if it is already at that end of Pending.
    #[instrument(skip(self))]
    pub fn move_pending_item(&self, id: &str, direction: Direction) -> Result<()> {
        self.mutate(|queue| {
            let index = queue
                .pending
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| QueueError::not_found(id))?;
            let neighbour = match direction {
                Direction::Up => index.checked_sub(1),
                Direction::Down => Some(index + 1).filter(|&n| n < queue.pending.len()),
            }
            .ok_or_else(|| QueueError::CannotMove {
                id: id.to_string(),
                direction,
            })?;
            queue.pending.swap(index, neighbour);
            Ok(())
        })
    }

    /// Empties Failed, returning how many entries were dropped.
    pub fn clear_failed_items(&self) -> usize {
        self.clear(|queue| std::mem::take(&mut queue.failed).len())
    }

    /// Empties Completed, returning how many entries were dropped.
    pub fn clear_completed_items(&self) -> usize {
        self.clear(|queue| std::mem::take(&mut queue.completed).len())
    }

    /// Moves a failed item back to the tail of Pending, dropping its error.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if `id` is not in Failed.
    #[instrument(skip(self))]
    pub fn retry_download(&self, id: &str) -> Result<Item> {
        self.mutate(|queue| {
            let index = queue
                .failed
                .iter()
                .position(|f| f.item.id == id)
                .ok_or_else(|| QueueError::not_found(id))?;
            let item = queue.failed.remove(index).item;
            queue.pending.push(item.clone());
            Ok(item)
        })
    }

    /// Claims a pending item for download, moving it to Downloading.
    ///
    /// Exactly one of any number of concurrent claims for the same id succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if `id` is not pending.
    #[instrument(skip(self))]
    pub fn move_to_downloading(&self, id: &str) -> Result<Item> {
        self.mutate(|queue| {
            let item = take_by_id(&mut queue.pending, id).ok_or_else(|| QueueError::not_found(id))?;
            queue.downloading.push(item.clone());
            Ok(item)
        })
    }

    /// Moves an in-flight item to Completed, keeping the caller's copy so a
    /// refined `size` is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if the item is not downloading.
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    pub fn move_to_completed(&self, item: &Item) -> Result<()> {
        self.mutate(|queue| {
            take_by_id(&mut queue.downloading, &item.id)
                .ok_or_else(|| QueueError::not_found(&item.id))?;
            queue.completed.push(item.clone());
            Ok(())
        })
    }

    /// Records a failure for an item that is downloading or still pending.
    ///
    /// Pending is searched too, so a failure detected before the transfer
    /// started is still recorded. The stored copy of the item is kept.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if the item is in neither sequence.
    #[instrument(skip(self, item, error), fields(item_id = %item.id))]
    pub fn move_to_failed(&self, item: &Item, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.mutate(|queue| {
            let stored = take_by_id(&mut queue.downloading, &item.id)
                .or_else(|| take_by_id(&mut queue.pending, &item.id))
                .ok_or_else(|| QueueError::not_found(&item.id))?;
            debug!(error = %error, "item moved to failed");
            queue.failed.push(FailedItem {
                item: stored,
                error,
            });
            Ok(())
        })
    }

    /// Updates the recorded size of an item that is currently downloading.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemNotFound`] if `id` is not downloading.
    pub fn refine_size(&self, id: &str, size: u64) -> Result<()> {
        self.mutate(|queue| {
            let item = queue
                .downloading
                .iter_mut()
                .find(|item| item.id == id)
                .ok_or_else(|| QueueError::not_found(id))?;
            item.size = size;
            Ok(())
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Queue> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut Queue) -> Result<T>) -> Result<T> {
        let mut queue = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let value = op(&mut queue)?;
        if let Some(snapshots) = &self.snapshots {
            snapshots.send_replace(queue.to_persisted());
        }
        Ok(value)
    }

    fn clear(&self, op: impl FnOnce(&mut Queue) -> usize) -> usize {
        self.mutate(|queue| Ok(op(queue))).unwrap_or_default()
    }
}

fn take_by_id(items: &mut Vec<Item>, id: &str) -> Option<Item> {
    let index = items.iter().position(|item| item.id == id)?;
    Some(items.remove(index))
}

fn contains_id(queue: &Queue, id: &str) -> bool {
    queue
        .downloading
        .iter()
        .chain(&queue.pending)
        .chain(&queue.completed)
        .chain(queue.failed.iter().map(|f| &f.item))
        .any(|item| item.id == id)
}
