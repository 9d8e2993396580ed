//! `GET /ws`: bridges a WebSocket connection to a hub [`Observer`].
//!
//! The connection joins the hub on upgrade. Hub messages are forwarded as
//! text frames; inbound frames are read only to notice a close. The observer
//! is dropped (and deregistered) when the peer disconnects, a write fails,
//! the peer sends nothing for [`READ_DEADLINE`], or the hub drops it.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info};

use super::AppState;
use crate::hub::Observer;

/// Connections with no inbound frame (including pongs) for this long are closed.
const READ_DEADLINE: Duration = Duration::from_secs(60);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let observer = state.hub.join();
        serve_observer(socket, observer)
    })
}

async fn serve_observer(socket: WebSocket, mut observer: Observer) {
    let observer_id = observer.id();
    info!(observer_id, "websocket observer connected");
    let (mut sender, mut receiver) = socket.split();

    forward_events(&mut sender, &mut receiver, &mut observer, READ_DEADLINE).await;

    info!(observer_id, "websocket observer disconnected");
}

/// Pumps hub messages into `sender` until the peer leaves, a write fails, the
/// hub drops the observer, or nothing is read for `read_deadline`.
///
/// Only inbound frames push the read deadline back.
async fn forward_events<S, R, E>(
    sender: &mut S,
    receiver: &mut R,
    observer: &mut Observer,
    read_deadline: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let observer_id = observer.id();
    let deadline = tokio::time::sleep(read_deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = observer.next_message() => {
                let Some(message) = message else {
                    debug!(observer_id, "hub closed observer");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if let Err(error) = sender.send(Message::Text(message.to_string().into())).await {
                    debug!(observer_id, error = %error, "websocket write failed");
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => deadline.as_mut().reset(Instant::now() + read_deadline),
            },
            () = &mut deadline => {
                debug!(observer_id, "websocket read deadline exceeded");
                break;
            }
        }
    }
}
