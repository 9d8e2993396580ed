//! Error types for the download module.
//!
//! Every error eventually lands in the Failed list as its `Display` text, so
//! messages are written for an operator reading the queue.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Landing page unreachable, unparsable, or without a download form.
    Resolution,
    /// Bad status, content type or length, or a stream read/write failure.
    Transfer,
    /// Stopped by a user cancel request.
    Cancelled,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Transfer => "transfer",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while resolving or transferring a queue item.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The landing page could not be fetched.
    #[error("failed to fetch landing page {url}: {source}")]
    LandingPage {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The landing page answered with a non-success status.
    #[error("HTTP {status} fetching landing page {url}")]
    LandingPageStatus { url: String, status: u16 },

    /// No form with the expected action prefix was found on the landing page.
    #[error("download form not found")]
    FormNotFound {
        /// The landing page that was scanned.
        url: String,
    },

    /// A URL (item link or form action) could not be parsed.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// HTTP error response from the transfer endpoint.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The transfer endpoint served something other than a file.
    #[error("unexpected content type '{content_type}' from {url}")]
    UnexpectedContentType { url: String, content_type: String },

    /// The transfer endpoint announced a zero-length body.
    #[error("empty response body from {url}")]
    EmptyBody { url: String },

    /// Network-level error (DNS, connection refused, reset mid-stream, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being transferred.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while writing the download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The download was cancelled by the user.
    #[error("cancelled")]
    Cancelled,

    /// Every attempt in the retry budget failed; wraps the last cause.
    #[error("download failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Creates a landing-page fetch error from a reqwest error.
    pub fn landing_page(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::LandingPage {
            url: url.into(),
            source,
        }
    }

    /// Creates a form-not-found error.
    pub fn form_not_found(url: impl Into<String>) -> Self {
        Self::FormNotFound { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an unexpected content-type error. A missing header is reported
    /// as an empty content type.
    pub fn unexpected_content_type(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::UnexpectedContentType {
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps the last error of an exhausted retry budget.
    pub fn retries_exhausted(attempts: u32, last: DownloadError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Classifies the error. An exhausted budget keeps its cause's kind.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::LandingPage { .. }
            | Self::LandingPageStatus { .. }
            | Self::FormNotFound { .. }
            | Self::InvalidUrl { .. } => FailureKind::Resolution,
            Self::HttpStatus { .. }
            | Self::UnexpectedContentType { .. }
            | Self::EmptyBody { .. }
            | Self::Network { .. }
            | Self::Io { .. }
            | Self::ClientBuild(_) => FailureKind::Transfer,
            Self::Cancelled => FailureKind::Cancelled,
            Self::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    /// Returns true if this error means the user cancelled the download.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
