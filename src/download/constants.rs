//! Constants for the download module (timeouts, chunking, polling).

use std::time::Duration;

/// Landing-page fetch timeout (30 seconds).
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP connect timeout for the transfer request. The transfer itself has no
/// overall deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Write buffer size for streaming the body to disk (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// How often the worker looks at Pending when it is idle.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum wall-clock time between two progress events for the same item.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(4);

/// Action prefix of the form that leads to the direct download.
pub const DOWNLOAD_FORM_PREFIX: &str = "/free/";

/// MIME types (or `type/` prefixes) accepted from the transfer endpoint.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/force-download",
    "video/",
    "audio/",
    "image/",
    "application/pdf",
    "application/zip",
    "application/x-rar-compressed",
    "application/x-tar",
    "application/x-gzip",
    "application/x-bzip2",
    "application/x-7z-compressed",
];
