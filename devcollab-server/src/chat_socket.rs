//! WebSocket bridge between a browser and one chat room.
//!
//! Frames sent to the browser are JSON objects tagged by `type`:
//! `ready`, `message` (with `direction`), and `error`. Text frames from the
//! browser are message bodies.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use devcollab_core::models::Message;
use devcollab_core::{ChatError, ChatSurface, IdentityEnricher};
use uuid::Uuid;

use crate::http::HttpState;

fn message_frame(message: &Message, outgoing: bool) -> String {
    serde_json::json!({
        "type": "message",
        "direction": if outgoing { "outgoing" } else { "incoming" },
        "message": message,
    })
    .to_string()
}

fn error_frame(error: &str) -> String {
    serde_json::json!({ "type": "error", "error": error }).to_string()
}

/// Drive one chat connection until either side closes or the server stops.
pub async fn run_chat_socket(
    mut socket: WebSocket,
    state: Arc<HttpState>,
    room: String,
    token: String,
) {
    let conn_id = Uuid::new_v4();
    tracing::info!(%conn_id, room = %room, "Chat socket connected");

    let mut enricher = IdentityEnricher::new(state.github.clone());
    let mut surface = ChatSurface::new(state.realtime.clone());
    if let Some(identity) = enricher.enrich(&token).await {
        surface.authenticate(identity.clone());
    }

    if let Err(e) = surface.bind(&room).await {
        tracing::error!(%conn_id, room = %room, error = %e, "Failed to bind chat room");
        let _ = socket.send(WsMessage::Text(error_frame(&e.to_string()))).await;
        let _ = socket.close().await;
        return;
    }

    let ready = serde_json::json!({
        "type": "ready",
        "room": room,
        "identity": surface.identity(),
    })
    .to_string();
    if socket.send(WsMessage::Text(ready)).await.is_err() {
        surface.unmount().await;
        return;
    }

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(%conn_id, error = %e, "Chat socket read error");
                        break;
                    }
                };
                let reply = match surface.send(&text).await {
                    Ok(message) => message_frame(&message, true),
                    Err(ChatError::EmptyMessage) => continue,
                    Err(e) => error_frame(&e.to_string()),
                };
                if socket.send(WsMessage::Text(reply)).await.is_err() {
                    break;
                }
            }
            inbound = surface.next_inbound() => {
                let Some(message) = inbound else {
                    tracing::warn!(%conn_id, room = %room, "Realtime channel closed");
                    let _ = socket.send(WsMessage::Text(error_frame("realtime channel closed"))).await;
                    break;
                };
                if socket.send(WsMessage::Text(message_frame(&message, false))).await.is_err() {
                    break;
                }
            }
            _ = state.shutdown.cancelled() => {
                let _ = socket.close().await;
                break;
            }
        }
    }

    surface.unmount().await;
    tracing::info!(%conn_id, room = %room, "Chat socket closed");
}
