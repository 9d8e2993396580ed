//! Download worker: link resolution, streaming transfer, retry and cancel.
//!
//! # Features
//!
//! - Landing-page scraping for the direct-download form ([`FormLinkResolver`])
//! - Streaming transfer to disk through a 1 MiB buffer
//! - Exponential backoff with symmetric jitter ([`RetryPolicy`])
//! - Cooperative per-item cancellation ([`Downloader::cancel`])
//! - Throttled progress events published through the notification hub
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fsqd_core::download::{Downloader, DownloaderConfig, FormLinkResolver, HttpClient};
//! use fsqd_core::hub::{HubConfig, NotificationHub};
//! use fsqd_core::queue::QueueStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = CancellationToken::new();
//! let store = Arc::new(QueueStore::open("./data").await);
//! let hub = NotificationHub::spawn(HubConfig::default(), shutdown.clone());
//! let downloader = Arc::new(Downloader::new(
//!     Arc::clone(&store),
//!     hub,
//!     Arc::new(FormLinkResolver::new()?),
//!     HttpClient::new()?,
//!     DownloaderConfig::new("./downloads"),
//! ));
//! let worker = Arc::clone(&downloader).spawn(shutdown.clone());
//! # shutdown.cancel();
//! # worker.await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod progress;
mod resolver;
mod retry;
mod worker;

pub use client::{HttpClient, TransferResponse, is_allowed_content_type, sanitize_file_name};
pub use constants::{ALLOWED_CONTENT_TYPES, CHUNK_SIZE, DOWNLOAD_FORM_PREFIX, RESOLVE_TIMEOUT};
pub use error::{DownloadError, FailureKind};
pub use progress::{ProgressTracker, format_speed};
pub use resolver::{FormLinkResolver, LinkResolver, find_download_action, page_client};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};
pub use worker::{DownloadStats, Downloader, DownloaderConfig};

pub(crate) use resolver::{compile_static_regex, decode_entities};

// Note: we do NOT define module-local Result aliases here.
// Use `Result<T, DownloadError>` explicitly in function signatures.
