//! Shared User-Agent for landing-page, metadata and transfer requests.
//!
//! The source site serves the download form only to browser-looking clients,
//! so every request goes out with the same desktop browser string.

/// Desktop browser User-Agent sent with every outgoing request.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
