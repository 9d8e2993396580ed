//! Download queue engine.
//!
//! A single-worker file download daemon: links are queued, resolved through
//! their landing page, and streamed to disk one at a time while connected
//! observers receive live queue and progress notifications.
//!
//! # Architecture
//!
//! - [`queue`] - the Queue Store: Pending/Downloading/Completed/Failed lists
//!   behind one lock, with a JSON snapshot on disk
//! - [`download`] - the Downloader worker: form resolution, streaming transfer,
//!   retry with backoff, per-item cancellation
//! - [`hub`] - the Notification Hub: `update`/`progress` fan-out to observers
//! - [`metadata`] - best-effort title and size scraping for new links
//! - [`server`] - the HTTP/WebSocket route layer

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod hub;
pub mod metadata;
pub mod queue;
pub mod server;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_ATTEMPTS, DownloadError, DownloadStats, Downloader, DownloaderConfig,
    FailureKind, FormLinkResolver, HttpClient, LinkResolver, RetryPolicy,
};
pub use hub::{HubConfig, HubEvent, NotificationHub, Observer, ProgressUpdate};
pub use queue::{Direction, FailedItem, Item, Queue, QueueError, QueueStore};
pub use server::{AppState, router};
