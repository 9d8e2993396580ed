//! Landing-page link resolution.
//!
//! A queue item's link points at an HTML landing page, not at the file. The
//! page carries a form whose action (under [`DOWNLOAD_FORM_PREFIX`]) is the
//! real transfer endpoint; [`FormLinkResolver`] fetches the page and returns
//! that action as an absolute URL.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use tracing::{debug, instrument};
use url::Url;

use super::DownloadError;
use super::constants::{DOWNLOAD_FORM_PREFIX, RESOLVE_TIMEOUT};
use crate::user_agent::BROWSER_USER_AGENT;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// `action` attribute of every `<form>` opening tag: double-quoted,
/// single-quoted or bare.
static FORM_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<form\b[^>]*?\baction\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
    )
});

/// Decodes the character references that show up in attribute values and
/// text: the named basics plus decimal and hex numeric references.
pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let tail = &rest[start..];
        let replacement = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match replacement {
            Some((c, end)) => {
                decoded.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &tail[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

/// Turns a landing-page URL into the URL the file is POSTed from.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolves `page_url` to an absolute transfer URL.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] of kind
    /// [`FailureKind::Resolution`](super::FailureKind::Resolution) when the page
    /// cannot be fetched or carries no download form.
    async fn resolve(&self, page_url: &str) -> Result<String, DownloadError>;
}

/// Resolver that scrapes the landing page for the download form.
#[derive(Debug, Clone)]
pub struct FormLinkResolver {
    client: Client,
    form_prefix: String,
}

impl FormLinkResolver {
    /// Creates a resolver with the default 30s page timeout and `/free/` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_options(RESOLVE_TIMEOUT, DOWNLOAD_FORM_PREFIX)
    }

    /// Creates a resolver with a custom page timeout and form action prefix.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the HTTP client cannot be built.
    pub fn with_options(timeout: Duration, form_prefix: &str) -> Result<Self, DownloadError> {
        Ok(Self {
            client: page_client(timeout)?,
            form_prefix: form_prefix.to_string(),
        })
    }
}

#[async_trait]
impl LinkResolver for FormLinkResolver {
    #[instrument(skip(self), fields(page_url = %page_url))]
    async fn resolve(&self, page_url: &str) -> Result<String, DownloadError> {
        let base = Url::parse(page_url).map_err(|e| DownloadError::invalid_url(page_url, e))?;

        let response = self
            .client
            .get(base.clone())
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| DownloadError::landing_page(page_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::LandingPageStatus {
                url: page_url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| DownloadError::landing_page(page_url, e))?;

        let action = find_download_action(&html, &self.form_prefix)
            .ok_or_else(|| DownloadError::form_not_found(page_url))?;
        let resolved = base
            .join(&action)
            .map_err(|e| DownloadError::invalid_url(&action, e))?;

        debug!(resolved = %resolved, "download form found");
        Ok(resolved.to_string())
    }
}

/// Returns the decoded action of the last form whose action starts with `prefix`.
#[must_use]
pub fn find_download_action(html: &str, prefix: &str) -> Option<String> {
    FORM_ACTION_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|action| action.starts_with(prefix))
        .last()
}

/// Builds a client for HTML page fetches (landing pages and metadata).
///
/// # Errors
///
/// Returns [`DownloadError::ClientBuild`] if reqwest rejects the configuration.
pub fn page_client(timeout: Duration) -> Result<Client, DownloadError> {
    Client::builder()
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(DownloadError::ClientBuild)
}
