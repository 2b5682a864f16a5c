use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use war_of_ages_server::config::ServerConfig;
use war_of_ages_server::constants::OUTBOUND_QUEUE_CAPACITY;
use war_of_ages_server::error::CommandError;
use war_of_ages_server::protocol;
use war_of_ages_server::room::{next_connection_id, OutboundMessage, RoomMessage, RoomRegistry};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::parse();
    let rules = match config.load_rules() {
        Ok(rules) => rules,
        Err(error) => {
            error!(%error, "failed to load rules");
            std::process::exit(1);
        }
    };

    let registry = RoomRegistry::new(rules);
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/rooms/assign", post(assign_handler))
        .route("/ws/{room_id}/{player_id}", get(ws_handler))
        .with_state(registry);

    let app = match config.static_dir.as_ref() {
        Some(static_dir) if static_dir.join("index.html").is_file() => {
            info!(path = %static_dir.display(), "serving static files");
            let index_file = static_dir.join("index.html");
            app.fallback_service(
                ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
            )
        }
        Some(static_dir) => {
            warn!(path = %static_dir.display(), "static dir has no index.html; not serving it");
            app
        }
        None => app,
    };

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, bind_addr, "failed to bind server socket");
            std::process::exit(1);
        }
    };

    info!(port = config.port, "listening");
    if let Err(error) = axum::serve(listener, app).await {
        error!(%error, "server runtime failed");
        std::process::exit(1);
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn assign_handler(State(registry): State<RoomRegistry>) -> impl IntoResponse {
    Json(registry.assign().await)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<RoomRegistry>,
    Path((room_id, player_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(inbox) = registry.inbox(&room_id).await else {
        return (StatusCode::NOT_FOUND, "unknown room").into_response();
    };
    let name = sanitize_name(query.get("name").map(String::as_str).unwrap_or_default());
    ws.on_upgrade(move |socket| handle_socket(inbox, player_id, name, socket))
}

async fn handle_socket(
    inbox: mpsc::UnboundedSender<RoomMessage>,
    player_id: String,
    name: String,
    socket: WebSocket,
) {
    let connection_id = next_connection_id();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_CAPACITY);

    let joined = inbox.send(RoomMessage::Join {
        player_id: player_id.clone(),
        name,
        connection_id,
        tx: tx.clone(),
    });
    if joined.is_err() {
        debug!(player_id, "room closed before join");
        return;
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        let raw = match message {
            Message::Text(raw) => raw.to_string(),
            Message::Binary(raw) => match String::from_utf8(raw.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    reject_frame(&tx, "invalid utf8 message");
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };
        if !forward_frame(&inbox, &tx, &player_id, connection_id, &raw) {
            break;
        }
    }

    let _ = inbox.send(RoomMessage::Leave {
        player_id,
        connection_id,
    });
    drop(tx);
    let _ = writer.await;
}

fn forward_frame(
    inbox: &mpsc::UnboundedSender<RoomMessage>,
    tx: &mpsc::Sender<OutboundMessage>,
    player_id: &str,
    connection_id: u64,
    raw: &str,
) -> bool {
    match protocol::parse_client_message(raw) {
        Ok(request) => inbox
            .send(RoomMessage::Request {
                player_id: player_id.to_string(),
                connection_id,
                request,
            })
            .is_ok(),
        Err(rejected) => {
            if rejected.reply_to.is_none() {
                warn!(player_id, "malformed envelope");
            } else {
                debug!(player_id, code = rejected.error.code(), "request refused");
            }
            let text = protocol::error_message(&rejected.error, rejected.reply_to.as_deref())
                .to_text();
            let _ = tx.try_send(OutboundMessage::Text(text));
            true
        }
    }
}

fn reject_frame(tx: &mpsc::Sender<OutboundMessage>, message: &str) {
    let error = CommandError::validation(message);
    let text = protocol::error_message(&error, None).to_text();
    let _ = tx.try_send(OutboundMessage::Text(text));
}

fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(sanitize_name("  "), "Player");
        assert_eq!(sanitize_name(" Ada "), "Ada");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz").chars().count(), 16);
    }

    #[tokio::test]
    async fn commands_are_forwarded_and_garbage_answered() {
        let (inbox, mut room_rx) = mpsc::unbounded_channel();
        let (tx, mut client_rx) = mpsc::channel(4);

        let cmd = protocol::cmd_message(&war_of_ages_server::engine::Command::AdvanceTech);
        assert!(forward_frame(&inbox, &tx, "p1", 7, &cmd.to_text()));
        match room_rx.recv().await {
            Some(RoomMessage::Request {
                player_id,
                connection_id,
                request,
            }) => {
                assert_eq!(player_id, "p1");
                assert_eq!(connection_id, 7);
                assert_eq!(request.message_id(), cmd.message_id);
            }
            other => panic!("unexpected room message: {other:?}"),
        }

        assert!(forward_frame(&inbox, &tx, "p1", 7, "{nope"));
        match client_rx.recv().await {
            Some(OutboundMessage::Text(text)) => assert!(text.contains("validation_error")),
            other => panic!("unexpected outbound: {other:?}"),
        }
    }
}
