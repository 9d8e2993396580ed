//! The download worker: drains Pending one item at a time.
//!
//! # Per-item flow
//!
//! 1. Claim the head of Pending ([`QueueStore::move_to_downloading`]) and
//!    announce the change.
//! 2. Resolve the landing page to a transfer URL (once per item).
//! 3. Register a cancellation token under the item id.
//! 4. Transfer with retry: every attempt first checks the token, then POSTs,
//!    validates and streams the body. Failed attempts back off per
//!    [`RetryPolicy`]; a cancel ends the loop at once.
//! 5. Deregister the token (RAII guard), move the item to Completed or
//!    Failed and announce the change.
//!
//! Failures never propagate to a caller; they end up as the Failed entry's
//! error text.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, sanitize_file_name};
use super::constants::{POLL_INTERVAL, PROGRESS_INTERVAL};
use super::progress::ProgressTracker;
use super::resolver::LinkResolver;
use super::retry::{RetryDecision, RetryPolicy};
use super::DownloadError;
use crate::hub::NotificationHub;
use crate::queue::{Item, QueueStore};

/// Worker tunables.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Where finished files are written.
    pub download_dir: PathBuf,
    /// Idle sleep between looks at an empty Pending list.
    pub poll_interval: Duration,
    /// Minimum time between progress events.
    pub progress_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl DownloaderConfig {
    /// Default timings writing into `download_dir`.
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            poll_interval: POLL_INTERVAL,
            progress_interval: PROGRESS_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Running totals since the worker started.
///
/// Uses atomic counters so route handlers can read them while the worker runs.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of items that ended in Failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of items processed (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    /// Returns the number of backoff waits taken between attempts.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sequential download worker.
pub struct Downloader {
    store: Arc<QueueStore>,
    hub: NotificationHub,
    resolver: Arc<dyn LinkResolver>,
    client: HttpClient,
    config: DownloaderConfig,
    cancellations: DashMap<String, CancellationToken>,
    stats: DownloadStats,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("active", &self.cancellations.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Removes an item's cancellation token when the transfer ends, however it ends.
struct CancellationGuard<'a> {
    registry: &'a DashMap<String, CancellationToken>,
    id: String,
}

impl Drop for CancellationGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

impl Downloader {
    #[must_use]
    pub fn new(
        store: Arc<QueueStore>,
        hub: NotificationHub,
        resolver: Arc<dyn LinkResolver>,
        client: HttpClient,
        config: DownloaderConfig,
    ) -> Self {
        Self {
            store,
            hub,
            resolver,
            client,
            config,
            cancellations: DashMap::new(),
            stats: DownloadStats::new(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Runs the worker loop on its own task until `shutdown` is cancelled.
    ///
    /// An item in flight at shutdown is abandoned in Downloading; it is not
    /// part of the persisted snapshot.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Worker loop: process the head of Pending, or sleep for the poll
    /// interval when there is nothing to do.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(download_dir = %self.config.download_dir.display(), "download worker started");
        loop {
            let processed = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                processed = self.process_next() => processed,
            };
            if processed {
                continue;
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!(
            completed = self.stats.completed(),
            failed = self.stats.failed(),
            "download worker stopped"
        );
    }

    /// Processes the head of Pending end to end.
    ///
    /// Returns `false` if Pending was empty.
    pub async fn process_next(&self) -> bool {
        let Some(head) = self.store.first_pending() else {
            return false;
        };
        let item = match self.store.move_to_downloading(&head.id) {
            Ok(item) => item,
            Err(error) => {
                debug!(item_id = %head.id, error = %error, "pending item vanished before claim");
                return true;
            }
        };
        self.hub.broadcast_update();

        self.download(item).await;
        self.hub.broadcast_update();
        true
    }

    /// Signals cancellation to the in-flight transfer of `id`.
    ///
    /// Returns `false` if no transfer for `id` is registered.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: &str) -> bool {
        match self.cancellations.remove(id) {
            Some((_, token)) => {
                token.cancel();
                info!("download cancel requested");
                true
            }
            None => false,
        }
    }

    /// Returns true while a transfer for `id` can be cancelled.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.cancellations.contains_key(id)
    }

    #[instrument(skip(self, item), fields(item_id = %item.id, link = %item.link))]
    async fn download(&self, mut item: Item) {
        info!(name = %item.name, "download started");
        match self.resolve_and_transfer(&mut item).await {
            Ok(path) => {
                self.stats.increment_completed();
                info!(path = %path.display(), size = item.size, "download completed");
                if let Err(error) = self.store.move_to_completed(&item) {
                    warn!(error = %error, "completed item no longer downloading");
                }
            }
            Err(error) => {
                self.stats.increment_failed();
                warn!(error = %error, kind = %error.kind(), "download failed");
                if let Err(store_error) = self.store.move_to_failed(&item, error.to_string()) {
                    warn!(error = %store_error, "failed item no longer in queue");
                }
            }
        }
    }

    async fn resolve_and_transfer(&self, item: &mut Item) -> Result<PathBuf, DownloadError> {
        let transfer_url = self.resolver.resolve(&item.link).await?;
        debug!(transfer_url = %transfer_url, "link resolved");

        let (token, _guard) = self.register_cancellation(&item.id);
        let file_path = self
            .config
            .download_dir
            .join(sanitize_file_name(&item.name, &item.id));

        let policy = &self.config.retry_policy;
        let mut attempt = 1;
        loop {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let error = match self
                .attempt_transfer(item, &transfer_url, &file_path, &token)
                .await
            {
                Ok(bytes) => {
                    debug!(attempt, bytes, "attempt succeeded");
                    return Ok(file_path);
                }
                Err(error) => error,
            };

            match policy.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "attempt failed, backing off"
                    );
                    self.stats.increment_retried();
                    tokio::select! {
                        () = token.cancelled() => return Err(DownloadError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    if error.is_cancelled() {
                        return Err(error);
                    }
                    return Err(DownloadError::retries_exhausted(attempt, error));
                }
            }
        }
    }

    async fn attempt_transfer(
        &self,
        item: &mut Item,
        url: &str,
        file_path: &std::path::Path,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = self.client.open_transfer(url).await?;
        if let Some(length) = response.content_length().filter(|&length| length > 0) {
            item.size = length;
            if let Err(error) = self.store.refine_size(&item.id, length) {
                debug!(error = %error, "size not refined, item no longer downloading");
            }
        }

        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| DownloadError::io(&self.config.download_dir, e))?;

        let mut tracker =
            ProgressTracker::new(item.id.clone(), item.size, self.config.progress_interval);
        response
            .stream_to_file(file_path, &mut tracker, token, |update| {
                self.hub.broadcast_progress(update);
            })
            .await
    }

    fn register_cancellation(&self, id: &str) -> (CancellationToken, CancellationGuard<'_>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.cancellations.insert(id.to_string(), token.clone()) {
            previous.cancel();
        }
        (
            token,
            CancellationGuard {
                registry: &self.cancellations,
                id: id.to_string(),
            },
        )
    }
}
