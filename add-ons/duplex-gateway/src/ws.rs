//! WebSocket session handling.
//!
//! One socket per conversation. The read half dispatches client frames; a
//! dedicated writer task owns the write half and drains the session's
//! outbound channel, so pipeline tasks never contend for the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use duplex_voice::protocol::{
    parse_client_message, ClientMessage, ConnectedPayload, ErrorPayload, Outbound, ServerMessage,
    StatusPayload,
};
use duplex_voice::session::{teardown, ConnectionSession};
use duplex_voice::{generation, heartbeat, ingest, recognition};

use crate::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let connection_id = Uuid::new_v4().to_string();
    tracing::info!(connection = %connection_id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let result = match frame {
                Outbound::Message(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => sink.send(Message::Text(json)).await,
                    Err(e) => {
                        tracing::warn!(%e, "failed to serialize outbound message");
                        continue;
                    }
                },
                Outbound::Audio(bytes) => sink.send(Message::Binary(bytes)).await,
                Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
                Outbound::Pong(payload) => sink.send(Message::Pong(payload)).await,
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let session = ConnectionSession::new(
        connection_id.clone(),
        Arc::clone(&state.config),
        out_tx.clone(),
    );
    state.connections.add(Arc::clone(&session));

    session.send(ServerMessage::Connected {
        payload: ConnectedPayload::now(&connection_id),
    });
    session.send(ServerMessage::Ready);

    let monitor = heartbeat::spawn(Arc::clone(&session), Arc::clone(&state.providers));

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else { break };
        if !session.is_active() {
            break;
        }
        match frame {
            Message::Text(text) => handle_text(&session, &state, &text).await,
            Message::Binary(audio) => {
                ingest::ingest(&session, &state.providers, audio);
            }
            Message::Pong(_) => session.note_pong(),
            Message::Ping(payload) => session.send_pong(payload),
            Message::Close(_) => break,
        }
    }

    monitor.abort();
    teardown(&session, &state.providers, "socket closed").await;
    state.connections.remove(&session.id);
    drop(out_tx);
    let _ = writer.await;
    tracing::info!(connection = %session.id, "client disconnected");
}

async fn handle_text(session: &Arc<ConnectionSession>, state: &AppState, text: &str) {
    let message = match parse_client_message(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(connection = %session.id, %e, "bad client frame");
            session.send(ServerMessage::Error {
                payload: ErrorPayload::with_details("invalid message", e),
            });
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            session.note_pong();
            session.send(ServerMessage::Status {
                payload: StatusPayload {
                    app: state.config.app_name.clone(),
                    timestamp: Utc::now().to_rfc3339(),
                },
            });
        }
        ClientMessage::ClearConversation => {
            session.with_history(|h| h.clear());
            session.send(ServerMessage::ConversationCleared);
        }
        ClientMessage::GetConversation => {
            session.send(ServerMessage::ConversationHistory {
                payload: session.history_snapshot(),
            });
        }
        ClientMessage::TextInput(text) => {
            let session = Arc::clone(session);
            let providers = Arc::clone(&state.providers);
            tokio::spawn(async move {
                if let Err(e) = generation::process_input(&session, &providers, &text).await {
                    if !e.is_cancellation() {
                        tracing::warn!(connection = %session.id, %e, "text turn failed");
                    }
                }
            });
        }
        ClientMessage::StartRecognition => {
            if let Err(e) = recognition::start(session, &state.providers).await {
                tracing::warn!(connection = %session.id, %e, "recognition start failed");
                session.send(ServerMessage::Error {
                    payload: ErrorPayload::with_details(
                        "failed to start recognition",
                        e.to_string(),
                    ),
                });
            }
        }
        ClientMessage::StopRecognition => {
            if let Err(e) = recognition::stop(session, &state.providers).await {
                tracing::warn!(connection = %session.id, %e, "recognition stop failed");
                session.send(ServerMessage::Error {
                    payload: ErrorPayload::with_details(
                        "failed to stop recognition",
                        e.to_string(),
                    ),
                });
            }
        }
        ClientMessage::Unknown(kind) => {
            tracing::debug!(connection = %session.id, kind, "ignoring unknown message type");
        }
    }
}
