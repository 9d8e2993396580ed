//! Route handlers. Each one makes one engine call and, on success, asks the
//! hub to announce the change.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use super::error::HttpError;
use crate::metadata::extract_file_info;
use crate::queue::{Direction, Item, Queue};

/// `{"status": "..."}` success body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusBody {
    pub status: String,
}

impl StatusBody {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub direction: String,
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    body.map(|Json(value)| value)
        .map_err(|_| HttpError::BadRequest("invalid json".to_string()))
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn get_queue(State(state): State<AppState>) -> Json<Queue> {
    Json(state.store.get_queue())
}

pub async fn add_to_queue(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Result<Json<StatusBody>, HttpError> {
    let request = parse_body(body)?;
    let link = request.link.trim();
    if link.is_empty() {
        return Err(HttpError::BadRequest("link is required".to_string()));
    }

    let info = extract_file_info(&state.page_client, link).await;
    let item = Item::new(link, info.name, info.size);
    info!(item_id = %item.id, name = %item.name, size = item.size, "link enqueued");
    state.store.add_pending_item(item)?;
    state.hub.broadcast_update();
    Ok(StatusBody::new("added"))
}

pub async fn move_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<StatusBody>, HttpError> {
    let request = parse_body(body)?;
    let direction: Direction = request
        .direction
        .parse()
        .map_err(|_| HttpError::BadRequest("direction must be 'up' or 'down'".to_string()))?;

    state
        .store
        .move_pending_item(&id, direction)
        .map_err(|_| HttpError::NotFound("item not found or cannot move".to_string()))?;
    state.hub.broadcast_update();
    Ok(StatusBody::new("moved"))
}

pub async fn retry_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusBody>, HttpError> {
    state
        .store
        .retry_download(&id)
        .map_err(|_| HttpError::NotFound("failed item not found".to_string()))?;
    state.hub.broadcast_update();
    Ok(StatusBody::new("retried"))
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusBody>, HttpError> {
    if !state.downloader.cancel(&id) {
        return Err(HttpError::NotFound(
            "download not found or not active".to_string(),
        ));
    }
    state.hub.broadcast_update();
    Ok(StatusBody::new("cancelled"))
}

pub async fn remove_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusBody>, HttpError> {
    state
        .store
        .remove_item_by_id(&id)
        .map_err(|_| HttpError::NotFound("item not found".to_string()))?;
    state.hub.broadcast_update();
    Ok(StatusBody::new("deleted"))
}

pub async fn clear_failed(State(state): State<AppState>) -> Json<StatusBody> {
    let cleared = state.store.clear_failed_items();
    info!(cleared, "failed items cleared");
    state.hub.broadcast_update();
    StatusBody::new("cleared")
}

pub async fn clear_completed(State(state): State<AppState>) -> Json<StatusBody> {
    let cleared = state.store.clear_completed_items();
    info!(cleared, "completed items cleared");
    state.hub.broadcast_update();
    StatusBody::new("cleared")
}
