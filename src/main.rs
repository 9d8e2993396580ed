//! Daemon entry point: wires the queue store, notification hub, download
//! worker and HTTP server together and runs them until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fsqd_core::download::{RESOLVE_TIMEOUT, page_client};
use fsqd_core::server::{self, AppState};
use fsqd_core::{
    Downloader, DownloaderConfig, FormLinkResolver, HttpClient, HubConfig, NotificationHub,
    QueueStore,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > --log-level > quiet flag > verbose flag > info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!(version = env!("CARGO_PKG_VERSION"), "fsqd starting");

    let shutdown = CancellationToken::new();

    let store = Arc::new(QueueStore::open(&args.data_dir).await);
    let hub = NotificationHub::spawn(HubConfig::default(), shutdown.clone());

    let downloader = Arc::new(Downloader::new(
        Arc::clone(&store),
        hub.clone(),
        Arc::new(FormLinkResolver::new().context("failed to build landing page client")?),
        HttpClient::new().context("failed to build transfer client")?,
        DownloaderConfig::new(&args.download_dir),
    ));
    let worker = Arc::clone(&downloader).spawn(shutdown.clone());

    let state = AppState {
        store: Arc::clone(&store),
        hub,
        downloader,
        page_client: page_client(RESOLVE_TIMEOUT).context("failed to build metadata client")?,
    };

    let bind_address = args.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let served = server::serve(listener, state, shutdown.clone()).await;

    // The server may also stop on its own error; make sure everything else follows.
    shutdown.cancel();
    if let Err(error) = worker.await {
        warn!(error = %error, "download worker task failed");
    }
    store.shutdown().await;

    served.context("HTTP server failed")?;
    info!("fsqd stopped");
    Ok(())
}

/// Cancels `shutdown` on the first Ctrl-C or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Ctrl-C received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
        () = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
