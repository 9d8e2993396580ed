//! Thin HTTP/WebSocket layer over the queue engine.
//!
//! Handlers translate requests into [`QueueStore`] or [`Downloader`] calls and
//! announce successful mutations through the [`NotificationHub`]. No business
//! rules live here.

mod error;
mod handlers;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, put};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::download::Downloader;
use crate::hub::NotificationHub;
use crate::queue::QueueStore;

pub use error::HttpError;
pub use handlers::StatusBody;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<QueueStore>,
    pub hub: NotificationHub,
    pub downloader: Arc<Downloader>,
    /// Client used to scrape display metadata when a link is enqueued.
    pub page_client: reqwest::Client,
}

/// Builds the full route table with `state` applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/queue",
            get(handlers::get_queue).post(handlers::add_to_queue),
        )
        .route("/queue/failed", delete(handlers::clear_failed))
        .route("/queue/completed", delete(handlers::clear_completed))
        .route("/queue/{id}", delete(handlers::remove_item))
        .route("/queue/{id}/move", put(handlers::move_item))
        .route("/queue/{id}/retry", put(handlers::retry_item))
        .route("/queue/{id}/cancelDownload", put(handlers::cancel_download))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener address cannot be read or the server
/// fails while accepting connections.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("HTTP server shut down");
    Ok(())
}
