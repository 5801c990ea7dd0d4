use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use inkboard_shared::{decode_message, encode_message, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collections::{get_or_create_collection, normalize_app_id, save_collection};
use crate::logic::{apply_client_message, broadcast_snapshots, now_millis};
use crate::state::{AppState, Peer};

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn ws_handler(
    Path(app_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let app_id = match normalize_app_id(&app_id) {
        Some(id) => id,
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, app_id))
}

/// Frames are answered in the encoding they arrived in.
#[derive(Clone, Copy, PartialEq)]
enum Encoding {
    Json,
    Binary,
}

fn parse_frame(message: Message) -> Option<(ClientMessage, Encoding)> {
    match message {
        Message::Text(text) => serde_json::from_str::<ClientMessage>(&text)
            .map(|parsed| (parsed, Encoding::Json))
            .map_err(|error| debug!(%error, "invalid json frame"))
            .ok(),
        Message::Binary(data) => decode_message::<ClientMessage>(&data)
            .map(|parsed| (parsed, Encoding::Binary))
            .map_err(|error| debug!(%error, "invalid binary frame"))
            .ok(),
        _ => None,
    }
}

fn render_frame(message: &ServerMessage, encoding: Encoding) -> Option<Message> {
    match encoding {
        Encoding::Json => serde_json::to_string(message).ok().map(Message::Text),
        Encoding::Binary => encode_message(message).ok().map(Message::Binary),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, app_id: String) {
    let (mut socket_sender, mut socket_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = Uuid::now_v7();

    let collection = get_or_create_collection(&state, &app_id).await;
    {
        let mut collection = collection.write().await;
        collection.peers.insert(
            connection_id,
            Peer {
                tx: tx.clone(),
                subscriptions: HashMap::new(),
            },
        );
        info!(
            app_id = %app_id,
            conn = %connection_id,
            peers = collection.peers.len(),
            "ws connected"
        );
    }

    let encoding = Arc::new(std::sync::Mutex::new(Encoding::Binary));
    let send_encoding = encoding.clone();
    let send_app_id = app_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let current = send_encoding
                .lock()
                .map(|encoding| *encoding)
                .unwrap_or(Encoding::Binary);
            let Some(frame) = render_frame(&message, current) else {
                warn!(app_id = %send_app_id, kind = message.kind(), "failed to encode frame");
                continue;
            };
            if let ServerMessage::Snapshot { documents, .. } = &message {
                debug!(app_id = %send_app_id, documents = documents.len(), "snapshot send");
            }
            if socket_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = socket_receiver.next().await {
        if let Message::Close(frame) = &message {
            if let Some(frame) = frame {
                debug!(
                    app_id = %app_id,
                    conn = %connection_id,
                    code = frame.code,
                    reason = %frame.reason,
                    "ws close frame"
                );
            }
            break;
        }
        let Some((client_message, frame_encoding)) = parse_frame(message) else {
            continue;
        };
        if let Ok(mut current) = encoding.lock() {
            *current = frame_encoding;
        }
        let mut collection = collection.write().await;
        let dispatch = apply_client_message(
            &mut collection,
            connection_id,
            client_message,
            state.allow_anonymous,
            now_millis(),
        );
        if let Some(reply) = dispatch.reply {
            let _ = tx.send(reply);
        }
        if dispatch.changed {
            broadcast_snapshots(&mut collection);
        }
    }

    let maybe_data = {
        let mut collection = collection.write().await;
        collection.peers.remove(&connection_id);
        info!(
            app_id = %app_id,
            conn = %connection_id,
            peers = collection.peers.len(),
            "ws disconnected"
        );
        if collection.peers.is_empty() && collection.dirty {
            collection.dirty = false;
            Some(collection.to_file_data())
        } else {
            None
        }
    };
    send_task.abort();

    if let Some(data) = maybe_data {
        save_collection(&state, &app_id, &data).await;
    }

    let mut collections = state.collections.write().await;
    let idle = collection.read().await.peers.is_empty();
    if idle {
        if let Some(current) = collections.get(&app_id) {
            if Arc::ptr_eq(current, &collection) {
                collections.remove(&app_id);
            }
        }
    }
}
