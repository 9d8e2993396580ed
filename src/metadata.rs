//! Display metadata scraped from a landing page when a link is enqueued.
//!
//! The page exposes the file's title as the `title` attribute of the
//! `.section_title` element and its size as the text of `.footer-video-size`
//! (for example `1.5&nbsp;GB`). Extraction is best effort: any failure
//! yields [`FileInfo::unknown`].

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use tracing::{debug, instrument, warn};

use crate::download::{compile_static_regex, decode_entities};
use crate::user_agent::BROWSER_USER_AGENT;

/// Name used when the page has no usable title.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Opening tag of any element carrying the `section_title` class.
static SECTION_TITLE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<[a-z][a-z0-9]*\b[^>]*\bclass\s*=\s*["'][^"']*\bsection_title\b[^"']*["'][^>]*>"#,
    )
});

static TITLE_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)\btitle\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});

/// Text directly inside an element carrying the `footer-video-size` class.
static SIZE_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<[a-z][a-z0-9]*\b[^>]*\bclass\s*=\s*["'][^"']*\bfooter-video-size\b[^"']*["'][^>]*>([^<]*)<"#,
    )
});

/// Title and size shown for a queued link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    /// Size in bytes; 0 when unknown.
    pub size: u64,
}

impl FileInfo {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            size: 0,
        }
    }
}

/// Fetches `url` and extracts its [`FileInfo`]. Never fails.
#[instrument(skip(client))]
pub async fn extract_file_info(client: &Client, url: &str) -> FileInfo {
    let response = match client
        .get(url)
        .header(USER_AGENT, BROWSER_USER_AGENT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "failed to fetch landing page for metadata");
            return FileInfo::unknown();
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "landing page returned error status");
        return FileInfo::unknown();
    }

    match response.text().await {
        Ok(html) => {
            let info = parse_file_info(&html);
            debug!(name = %info.name, size = info.size, "file info extracted");
            info
        }
        Err(error) => {
            warn!(error = %error, "failed to read landing page body");
            FileInfo::unknown()
        }
    }
}

/// Extracts [`FileInfo`] from landing-page HTML. The last matching element wins.
#[must_use]
pub fn parse_file_info(html: &str) -> FileInfo {
    let name = SECTION_TITLE_TAG_RE
        .find_iter(html)
        .filter_map(|tag| TITLE_ATTR_RE.captures(tag.as_str()))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| decode_entities(m.as_str().trim()).replace('\u{a0}', " "))
        .last()
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());

    let size = SIZE_TEXT_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .last()
        .map_or(0, |m| parse_size(m.as_str()));

    FileInfo { name, size }
}

/// Parses a human size like `"1.5 GB"` into bytes (1024-based units B, KB,
/// MB, GB). Anything that is not exactly `<number> <unit>` yields 0.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_size(text: &str) -> u64 {
    let text = text.replace("&nbsp;", " ").replace("&#160;", " ");
    let mut parts = text.split_whitespace();
    let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return 0;
    };
    let Ok(value) = value.parse::<f64>() else {
        return 0;
    };
    if !value.is_finite() || value < 0.0 {
        return 0;
    }
    let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => 1024,
        "MB" => 1024 * 1024,
        "GB" => 1024 * 1024 * 1024,
        _ => return 0,
    };
    (value * multiplier as f64) as u64
}
