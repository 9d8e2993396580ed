//! HTTP client wrapper for the file transfer itself.
//!
//! The transfer endpoint is POSTed with the browser User-Agent. A response is
//! only streamed to disk once it passes [`HttpClient::open_transfer`]'s checks:
//! 2xx status, non-zero length, allowed content type.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::{ALLOWED_CONTENT_TYPES, CHUNK_SIZE, CONNECT_TIMEOUT};
use super::progress::ProgressTracker;
use crate::hub::ProgressUpdate;
use crate::user_agent::BROWSER_USER_AGENT;

/// HTTP client for transfer requests.
///
/// Created once and reused for every item to benefit from connection pooling.
/// There is no overall request timeout; a transfer runs for as long as the
/// server keeps sending or until it is cancelled.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// A validated transfer response, ready to stream.
#[derive(Debug)]
pub struct TransferResponse {
    url: String,
    response: reqwest::Response,
}

impl TransferResponse {
    /// Server-announced body length, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Streams the body into `file_path`, truncating any earlier attempt.
    ///
    /// `cancel` is checked before every chunk read and while waiting for one.
    /// Progress events produced by `tracker` are handed to `on_progress`,
    /// including the forced final event at end of stream or the empty-speed
    /// event on cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] if `cancel` fires, and
    /// [`DownloadError::Network`] / [`DownloadError::Io`] on stream or disk
    /// failures.
    #[instrument(skip_all, fields(url = %self.url, path = %file_path.display()))]
    pub async fn stream_to_file(
        self,
        file_path: &Path,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(ProgressUpdate),
    ) -> Result<u64, DownloadError> {
        let file = File::create(file_path)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = self.response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                chunk = stream.next() => Some(chunk),
            };
            let Some(chunk) = next else {
                // Keep whatever reached the buffer; the file is overwritten on retry.
                let _ = writer.flush().await;
                on_progress(tracker.cancelled());
                return Err(DownloadError::Cancelled);
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::network(&self.url, e))?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(file_path, e))?;

            if let Some(update) = tracker.record(chunk.len()) {
                on_progress(update);
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        debug!(bytes = tracker.transferred(), "transfer finished");
        on_progress(tracker.finished());
        Ok(tracker.transferred())
    }
}

impl HttpClient {
    /// Creates a transfer client with the default connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if reqwest rejects the configuration.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    /// Creates a transfer client with an explicit connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if reqwest rejects the configuration.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(DownloadError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Sends the transfer request and validates the response headers.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::Network`] if the request cannot be sent
    /// - [`DownloadError::HttpStatus`] for a non-2xx status
    /// - [`DownloadError::EmptyBody`] if `Content-Length` is 0
    /// - [`DownloadError::UnexpectedContentType`] if the content type is not allowed
    #[instrument(skip(self), fields(url = %url))]
    pub async fn open_transfer(&self, url: &str) -> Result<TransferResponse, DownloadError> {
        let response = self
            .client
            .post(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        if response.content_length() == Some(0) {
            return Err(DownloadError::empty_body(url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !is_allowed_content_type(content_type) {
            return Err(DownloadError::unexpected_content_type(url, content_type));
        }

        debug!(
            content_type,
            content_length = ?response.content_length(),
            "transfer response accepted"
        );
        Ok(TransferResponse {
            url: url.to_string(),
            response,
        })
    }
}

/// Returns true if `content_type` starts with one of the allowed file types.
#[must_use]
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| content_type.starts_with(allowed))
}

/// Reduces a display name to a safe file name: ASCII letters, digits, `-`,
/// `_`, `.` and space. Falls back to `fallback` if nothing usable remains.
#[must_use]
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
