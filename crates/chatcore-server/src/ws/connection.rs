//! One WebSocket connection's lifecycle (spec §4.3 Connection Set transport
//! + AMBIENT STACK idle timeout): idle timeout via `tokio::time::timeout`
//! around `receiver.next()`, Text/Binary/Ping/Pong/Close handling,
//! unparseable frames logged and dropped rather than closing the socket.
//!
//! A plain request/response loop — read one client message, compute a
//! reply, write it, repeat — isn't enough here: a registered connection may
//! receive broadcast chunks from a chat request another connection started
//! (spec §4.3's whole point is N clients per session) — so the socket's
//! sender half is owned by a dedicated writer
//! task that drains the [`chatcore_session::ServerFrame`] channel handed
//! back by `register_connection`, while the main task only ever reads.
//! Ping/Pong still needs the sender, so pong replies cross into the writer
//! task over a small side channel instead of going out inline.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chatcore_session::{ClientFrame, ConnectionId, ServerFrame, SessionError, SessionHandle};

use crate::state::AppState;

pub async fn handle_socket(socket: WebSocket, state: AppState, session_name: String, idle_timeout: Duration) {
    let (mut sender, mut receiver) = socket.split();

    let handle = match state.registry.get_or_create(&session_name).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(%err, session = %session_name, "could not obtain session actor");
            let _ = sender.close().await;
            return;
        }
    };

    let (connection_id, mut outbound) = match handle.register_connection().await {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(%err, session = %session_name, "session actor gone before registration");
            let _ = sender.close().await;
            return;
        }
    };

    tracing::debug!(session = %session_name, connection = %connection_id, "websocket connection established");

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if send_frame(&mut sender, &frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(data) = pong_rx.recv() => {
                    if sender.send(Message::Pong(data.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let message = match tokio::time::timeout(idle_timeout, receiver.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(_) => {
                tracing::info!(session = %session_name, connection = %connection_id, "connection idle timeout");
                break;
            }
        };

        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(connection = %connection_id, "dropping non-utf8 binary frame");
                    continue;
                }
            },
            Ok(Message::Ping(data)) => {
                let _ = pong_tx.send(data.to_vec());
                continue;
            }
            Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::warn!(%err, connection = %connection_id, "websocket error");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, connection = %connection_id, "dropping unparseable client frame");
                continue;
            }
        };

        match dispatch(&handle, connection_id, frame).await {
            Ok(()) => {}
            Err(SessionError::ActorGone) => {
                tracing::warn!(connection = %connection_id, "session actor gone, closing connection");
                break;
            }
            Err(err) => {
                tracing::warn!(%err, connection = %connection_id, "client frame rejected");
            }
        }
    }

    handle.unregister_connection(connection_id);
    writer.abort();
    tracing::debug!(session = %session_name, connection = %connection_id, "websocket connection closed");
}

/// Translate one parsed [`ClientFrame`] into the matching `SessionHandle`
/// call (spec §4.4: each variant maps onto exactly one controller
/// operation). Frames whose outcome is delivered asynchronously via the
/// connection's own broadcast channel (`chat-request`, the tool frames,
/// `resume-ack`) still await their ack here so a rejection — an unknown
/// `toolCallId` after retries exhaust, for instance — surfaces as a log
/// line instead of silently vanishing.
async fn dispatch(handle: &SessionHandle, connection: ConnectionId, frame: ClientFrame) -> Result<(), SessionError> {
    match frame {
        ClientFrame::ChatRequest { id, init } => handle.chat_request(id, init.body).await,
        ClientFrame::ChatCancel { id } => {
            handle.chat_cancel(id);
            Ok(())
        }
        ClientFrame::ToolResult {
            tool_call_id,
            tool_name: _,
            output,
            state,
            error_text,
            auto_continue,
        } => {
            handle
                .tool_result(tool_call_id, output, state, error_text, auto_continue)
                .await
        }
        ClientFrame::ToolApproval {
            tool_call_id,
            approved,
            auto_continue,
        } => handle.tool_approval(tool_call_id, approved, auto_continue).await,
        ClientFrame::ChatClear => handle.chat_clear().await,
        ClientFrame::ChatMessages { messages } => handle.chat_messages(messages).await,
        ClientFrame::ResumeRequest { id } => {
            handle.resume_request(connection, id);
            Ok(())
        }
        ClientFrame::ResumeAck { id } => handle.resume_ack(connection, id).await,
    }
}

async fn send_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
