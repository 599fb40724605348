//! The session actor (spec §5: "single-threaded cooperative"): a `Session`
//! runs on exactly one task, reached only through an mpsc command channel.
//! `SessionHandle` is the cheaply-cloneable, `Send + Sync` front door every
//! transport connection talks to; none of `Session`'s internals need locking
//! because only this task ever calls into them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chatcore_storage::Storage;
use chatcore_types::{Message, RequestId};

use crate::config::SessionConfig;
use crate::connection::ConnectionId;
use crate::controller::Session;
use crate::error::{Result, SessionError};
use crate::frame::{ChatRequestBody, ServerFrame};
use crate::model::ModelDriver;

enum Command {
    ChatRequest {
        request_id: RequestId,
        body: ChatRequestBody,
        reply: oneshot::Sender<Result<()>>,
    },
    ToolResult {
        tool_call_id: String,
        output: serde_json::Value,
        state: Option<String>,
        error_text: Option<String>,
        auto_continue: Option<bool>,
        reply: oneshot::Sender<Result<()>>,
    },
    ToolApproval {
        tool_call_id: String,
        approved: bool,
        auto_continue: Option<bool>,
        reply: oneshot::Sender<Result<()>>,
    },
    ChatMessages {
        messages: Vec<Message>,
        reply: oneshot::Sender<Result<()>>,
    },
    ChatClear {
        reply: oneshot::Sender<Result<()>>,
    },
    ResumeRequest {
        connection: ConnectionId,
        request_id: RequestId,
    },
    ResumeAck {
        connection: ConnectionId,
        request_id: RequestId,
        reply: oneshot::Sender<Result<()>>,
    },
    RegisterConnection {
        reply: oneshot::Sender<(ConnectionId, mpsc::UnboundedReceiver<ServerFrame>)>,
    },
    UnregisterConnection {
        connection: ConnectionId,
    },
}

/// Handle to a running session actor. Send-able across tasks and sockets;
/// every method just enqueues a [`Command`] and, where the caller needs the
/// outcome, awaits a oneshot reply.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    /// Clone of the session's cancellation registry (spec §4.4.2, §5). Kept
    /// alongside `tx` rather than routed through it: a `chat-cancel` sent
    /// while the actor is deep inside an `await` on `handle_chat_request`
    /// would otherwise sit in the command queue until that turn finishes on
    /// its own, which defeats cooperative cancellation entirely. Cancelling
    /// a token is a plain atomic flag flip, safe to do from any task without
    /// going through the single-owner actor loop.
    cancellations: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
}

impl SessionHandle {
    /// Spawn a new session actor and return a handle to it. The actor
    /// restores persisted messages and any orphaned stream (spec §4.4.6)
    /// before it starts accepting commands.
    pub fn spawn(name: impl Into<String>, storage: Arc<Storage>, model: Arc<dyn ModelDriver>) -> Self {
        Self::spawn_with_config(name, storage, model, SessionConfig::default())
    }

    pub fn spawn_with_config(
        name: impl Into<String>,
        storage: Arc<Storage>,
        model: Arc<dyn ModelDriver>,
        config: SessionConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = name.into();
        let session = Session::with_config(name.clone(), storage, model, config);
        let cancellations = session.cancellation_registry();
        tokio::spawn(async move {
            let mut session = session;
            if let Err(err) = session.restore() {
                tracing::error!(session = %name, %err, "failed to restore session on actor start");
            }
            run(session, rx).await;
        });
        Self { tx, cancellations }
    }

    pub async fn chat_request(&self, request_id: RequestId, body: ChatRequestBody) -> Result<()> {
        self.call(|reply| Command::ChatRequest {
            request_id,
            body,
            reply,
        })
        .await
    }

    /// Cancels an in-flight request immediately via the shared registry,
    /// bypassing the command queue (see the `cancellations` field doc).
    pub fn chat_cancel(&self, request_id: RequestId) {
        if let Some(token) = self.cancellations.lock().get(&request_id) {
            token.cancel();
        }
    }

    pub async fn tool_result(
        &self,
        tool_call_id: String,
        output: serde_json::Value,
        state: Option<String>,
        error_text: Option<String>,
        auto_continue: Option<bool>,
    ) -> Result<()> {
        self.call(|reply| Command::ToolResult {
            tool_call_id,
            output,
            state,
            error_text,
            auto_continue,
            reply,
        })
        .await
    }

    pub async fn tool_approval(
        &self,
        tool_call_id: String,
        approved: bool,
        auto_continue: Option<bool>,
    ) -> Result<()> {
        self.call(|reply| Command::ToolApproval {
            tool_call_id,
            approved,
            auto_continue,
            reply,
        })
        .await
    }

    pub async fn chat_messages(&self, messages: Vec<Message>) -> Result<()> {
        self.call(|reply| Command::ChatMessages { messages, reply }).await
    }

    pub async fn chat_clear(&self) -> Result<()> {
        self.call(|reply| Command::ChatClear { reply }).await
    }

    /// Fire-and-forget: the suspend side effect happens immediately on the
    /// actor; `stream-resuming` is sent to the connection from there too.
    pub fn resume_request(&self, connection: ConnectionId, request_id: RequestId) {
        let _ = self.tx.send(Command::ResumeRequest { connection, request_id });
    }

    pub async fn resume_ack(&self, connection: ConnectionId, request_id: RequestId) -> Result<()> {
        self.call(|reply| Command::ResumeAck {
            connection,
            request_id,
            reply,
        })
        .await
    }

    pub async fn register_connection(&self) -> Result<(ConnectionId, mpsc::UnboundedReceiver<ServerFrame>)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::RegisterConnection { reply: reply_tx })
            .map_err(|_| SessionError::ActorGone)?;
        reply_rx.await.map_err(|_| SessionError::ActorGone)
    }

    pub fn unregister_connection(&self, connection: ConnectionId) {
        let _ = self.tx.send(Command::UnregisterConnection { connection });
    }

    async fn call<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).map_err(|_| SessionError::ActorGone)?;
        reply_rx.await.map_err(|_| SessionError::ActorGone)?
    }
}

async fn run(mut session: Session, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::ChatRequest { request_id, body, reply } => {
                let result = session.handle_chat_request(request_id, body).await;
                let _ = reply.send(result);
            }
            Command::ToolResult {
                tool_call_id,
                output,
                state,
                error_text,
                auto_continue,
                reply,
            } => {
                let result = session
                    .handle_tool_result(&tool_call_id, output, state, error_text, auto_continue)
                    .await;
                let _ = reply.send(result);
            }
            Command::ToolApproval {
                tool_call_id,
                approved,
                auto_continue,
                reply,
            } => {
                let result = session.handle_tool_approval(&tool_call_id, approved, auto_continue).await;
                let _ = reply.send(result);
            }
            Command::ChatMessages { messages, reply } => {
                let _ = reply.send(session.handle_chat_messages(messages));
            }
            Command::ChatClear { reply } => {
                let _ = reply.send(session.handle_chat_clear());
            }
            Command::ResumeRequest { connection, request_id } => {
                session.handle_resume_request(connection, request_id);
            }
            Command::ResumeAck {
                connection,
                request_id,
                reply,
            } => {
                let _ = reply.send(session.handle_resume_ack(connection, request_id));
            }
            Command::RegisterConnection { reply } => {
                let _ = reply.send(session.register_connection());
            }
            Command::UnregisterConnection { connection } => {
                session.unregister_connection(connection);
            }
        }
    }
    debug!(session = %session.name(), "session actor shutting down, no more handles");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{ScriptedDriver, SlowCancellableDriver};
    use chatcore_chunks::StreamChunk;
    use chatcore_storage::Storage;
    use serde_json::Map;
    use std::time::Duration;

    #[tokio::test]
    async fn actor_round_trips_a_chat_request_through_the_command_channel() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let model = Arc::new(ScriptedDriver {
            chunks: vec![
                StreamChunk::TextStart,
                StreamChunk::TextDelta { delta: "hi".into() },
                StreamChunk::TextEnd,
            ],
        });
        let handle = SessionHandle::spawn("test", storage, model);

        let (_conn, mut rx) = handle.register_connection().await.unwrap();
        handle
            .chat_request(
                RequestId::new("r1"),
                ChatRequestBody {
                    messages: vec![Message::user("hi")],
                    extra: Map::new(),
                },
            )
            .await
            .unwrap();

        let mut saw_done = false;
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::ChatResponse { done: true, .. } = frame {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    /// Regression test: a `chat-cancel` sent while a turn is mid-stream must
    /// interrupt it promptly, not sit queued behind `handle_chat_request`
    /// until the scripted chunks run out on their own. Uses a driver slow
    /// enough (10 chunks x 200ms) that the full, uncancelled run would take
    /// ~2s; the assertion bounds the actual wall time well under that.
    #[tokio::test]
    async fn chat_cancel_interrupts_a_turn_already_in_flight() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let chunks: Vec<StreamChunk> = (0..10)
            .map(|i| StreamChunk::TextDelta { delta: format!("chunk-{i}") })
            .collect();
        let model = Arc::new(SlowCancellableDriver {
            chunks,
            delay: Duration::from_millis(200),
        });
        let handle = SessionHandle::spawn("test", storage, model);
        let (_conn, _rx) = handle.register_connection().await.unwrap();

        let request_id = RequestId::new("r1");
        let request_handle = handle.clone();
        let request_id_clone = request_id.clone();
        let join = tokio::spawn(async move {
            request_handle
                .chat_request(
                    request_id_clone,
                    ChatRequestBody {
                        messages: vec![Message::user("hi")],
                        extra: Map::new(),
                    },
                )
                .await
        });

        // Give the turn a moment to start and register its cancellation
        // token, then cancel it while it is still awaiting later chunks.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.chat_cancel(request_id);

        let outcome = tokio::time::timeout(Duration::from_millis(500), join)
            .await
            .expect("chat_request should finish promptly once cancelled, not wait for all chunks")
            .unwrap();
        assert!(outcome.is_ok());
    }
}
