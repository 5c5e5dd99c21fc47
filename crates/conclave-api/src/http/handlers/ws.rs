//! WebSocket handler for live room activity and human input.
//!
//! `/api/v1/rooms/{id}/ws` upgrades to a WebSocket bound to one room. Once
//! connected, the handler:
//!
//! - **Forwards room activity:** a snapshot first, then every room event in
//!   sequence order, each as a JSON text frame tagged by `kind`.
//! - **Receives commands:** text frames parsed as [`WsCommand`] post human
//!   messages, resume after a detected gap, or ping.
//!
//! Server replies to commands are tagged by `type` so clients can tell them
//! apart from room items. Disconnecting does **not** cancel in-flight
//! dispatches; a reconnecting client resumes from its last seen sequence.
//!
//! `/api/v1/bots/ws` streams process-wide bot status changes, one JSON
//! object per frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use conclave_core::sync::RoomStream;
use conclave_types::bot::BotStatusChange;
use conclave_types::error::ErrorCode;
use conclave_types::event::{InboundEvent, InterfaceKind};
use conclave_types::message::MessageKind;

use crate::http::error::AppError;
use crate::state::AppState;

/// Incoming command from a WebSocket client.
///
/// Unknown or malformed frames are answered with an error frame and
/// otherwise ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Post a human message into the bound room.
    Send {
        sender_id: String,
        content: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        reply_to: Option<Uuid>,
        #[serde(default)]
        client_event_id: Option<String>,
    },
    /// Replace the subscription with one resuming after `last_seen_seq`.
    Resume { last_seen_seq: u64 },
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Server replies to commands.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Accepted { message_id: Uuid, seq: u64 },
    Duplicate,
    Resumed { after_seq: u64 },
    Error { code: ErrorCode, message: String },
    Pong,
}

impl ServerFrame {
    fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }
}

/// Upgrade an HTTP request to a WebSocket bound to one room.
///
/// Unknown rooms are rejected before the upgrade with the usual envelope.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let room = state.conclave.rooms().get(&room_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, room.id)))
}

/// Core WebSocket connection handler.
///
/// Uses `tokio::select!` to multiplex the room stream and incoming client
/// frames in a single task, so a `resume` can swap the stream in place.
async fn handle_ws_connection(socket: WebSocket, state: AppState, room_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut stream = state.conclave.subscribe(&room_id);
    tracing::debug!(%room_id, "room socket attached");

    loop {
        tokio::select! {
            // --- Branch 1: Forward room items to the client ---
            item = stream.next() => {
                match item {
                    Some(Ok(item)) => match serde_json::to_string(&item) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%room_id, "Failed to serialize room item: {err}");
                        }
                    },
                    Some(Err(err)) => {
                        let frame = ServerFrame::error(err.code(), err.to_string());
                        let _ = send_frame(&mut ws_sender, &frame).await;
                        break;
                    }
                    // Room deleted or bus closed.
                    None => break,
                }
            }

            // --- Branch 2: Process commands from the client ---
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = process_command(&text, &state, &room_id, &mut stream).await;
                        if send_frame(&mut ws_sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Binary, ping and pong protocol frames are handled by axum.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws_sender.close().await;
    tracing::debug!(%room_id, "room socket closed");
}

async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    ws_sender.send(Message::Text(json.into())).await
}

/// Parse and apply a single client command, returning the reply frame.
async fn process_command(
    text: &str,
    state: &AppState,
    room_id: &str,
    stream: &mut RoomStream,
) -> ServerFrame {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "Ignoring malformed WebSocket command");
            return ServerFrame::error(ErrorCode::ValidationError, err.to_string());
        }
    };

    match cmd {
        WsCommand::Send {
            sender_id,
            content,
            kind,
            reply_to,
            client_event_id,
        } => {
            let event = InboundEvent {
                interface: InterfaceKind::Web,
                room_id: Some(room_id.to_string()),
                sender_id,
                content,
                kind,
                reply_to,
                metadata: None,
                client_event_id,
            };
            match state.conclave.ingest(event).await {
                Ok(Some(message)) => ServerFrame::Accepted {
                    message_id: message.id,
                    seq: message.seq,
                },
                Ok(None) => ServerFrame::Duplicate,
                Err(err) => ServerFrame::error(err.code(), err.to_string()),
            }
        }
        WsCommand::Resume { last_seen_seq } => {
            *stream = state.conclave.resume(room_id, last_seen_seq);
            tracing::debug!(%room_id, last_seen_seq, "room socket resumed");
            ServerFrame::Resumed {
                after_seq: last_seen_seq,
            }
        }
        WsCommand::Ping => ServerFrame::Pong,
    }
}

/// Upgrade to a WebSocket carrying bot status changes.
pub async fn status_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let changes = state.conclave.dispatcher().status_changes();
    ws.on_upgrade(move |socket| handle_status_connection(socket, changes))
}

async fn handle_status_connection(socket: WebSocket, mut changes: broadcast::Receiver<BotStatusChange>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            frame = next_status_frame(&mut changes) => {
                let Some(json) = frame else { break };
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws_sender.close().await;
}

/// The next status change as JSON. Skips over lag; `None` once the
/// dispatcher is gone.
async fn next_status_frame(changes: &mut broadcast::Receiver<BotStatusChange>) -> Option<String> {
    loop {
        match changes.recv().await {
            Ok(change) => match serde_json::to_string(&change) {
                Ok(json) => return Some(json),
                Err(err) => tracing::warn!("Failed to serialize status change: {err}"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "status socket lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
