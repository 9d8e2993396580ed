//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Single-worker download queue daemon.
///
/// Serves the queue over HTTP, downloads pending links one at a time, and
/// streams queue and progress notifications to WebSocket observers.
#[derive(Parser, Debug)]
#[command(name = "fsqd")]
#[command(author, version, about)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the queue snapshot (queue.json)
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Directory downloaded files are written to
    #[arg(long, env = "DOWNLOAD_DIR", default_value = "./downloads")]
    pub download_dir: PathBuf,

    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_filter(&self) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if self.quiet {
            return "error".to_string();
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string()
    }

    /// `host:port` string for the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
