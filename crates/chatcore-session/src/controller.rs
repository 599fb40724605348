//! The Session Controller (spec §4.4): the protocol state machine that
//! dispatches inbound frames, drives the model, fans out chunks to live
//! connections, persists terminal messages, sanitizes, and reconciles.
//!
//! `Session` is not `Sync` over its own mutation: every method here takes
//! `&mut self` and is meant to be driven by exactly one task at a time (spec
//! §5 "single-threaded cooperative"). [`crate::actor`] wraps it in the
//! actual actor loop that external callers talk to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatcore_chunks::{self as chunks, StreamChunk};
use chatcore_storage::Storage;
use chatcore_streamlog::{RestoreOutcome, StreamLog};
use chatcore_types::{Message, MessageId, Part, RequestId, Role, ToolState, sanitize_message_with_keys};

use crate::config::SessionConfig;
use crate::connection::{ConnectionId, ConnectionSet};
use crate::error::{Result, SessionError};
use crate::frame::{ChatRequestBody, ServerFrame};
use crate::merge::reconcile;
use crate::model::ModelDriver;
use crate::tool_cache::ToolCache;

/// Default error text used when a `tool-result` reports failure without one
/// (spec §4.4.3: "default error text used if absent").
const DEFAULT_TOOL_ERROR_TEXT: &str = "tool execution failed";

pub struct Session {
    name: String,
    storage: Arc<Storage>,
    stream_log: StreamLog,
    model: Arc<dyn ModelDriver>,
    config: SessionConfig,
    messages: Vec<Message>,
    connections: ConnectionSet,
    /// Shared with [`crate::actor::SessionHandle`] so a `chat-cancel` frame
    /// can reach a streaming turn's token directly, instead of waiting in
    /// line behind the actor's command queue for the turn to finish on its
    /// own (spec §4.4.2, §5: cancellation must interrupt a turn already in
    /// flight). A plain `parking_lot::Mutex` is enough here: the only
    /// operations are insert/remove/cancel, none of which ever block.
    active_requests: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    tool_cache: ToolCache,
}

impl Session {
    pub fn new(name: impl Into<String>, storage: Arc<Storage>, model: Arc<dyn ModelDriver>) -> Self {
        Self::with_config(name, storage, model, SessionConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        storage: Arc<Storage>,
        model: Arc<dyn ModelDriver>,
        config: SessionConfig,
    ) -> Self {
        let stream_log = StreamLog::new(storage.clone(), config.stream_log.clone());
        Self {
            name: name.into(),
            storage,
            stream_log,
            model,
            config,
            messages: Vec::new(),
            connections: ConnectionSet::new(),
            active_requests: Arc::new(Mutex::new(HashMap::new())),
            tool_cache: ToolCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clone of the shared cancellation registry, handed to
    /// [`crate::actor::SessionHandle`] once at spawn time so it can cancel a
    /// streaming turn directly.
    pub fn cancellation_registry(&self) -> Arc<Mutex<HashMap<RequestId, CancellationToken>>> {
        self.active_requests.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Load persisted messages and run the Resumable Stream Log's
    /// `restore()` (spec §4.4.6). Call once when the session actor starts.
    pub fn restore(&mut self) -> Result<()> {
        self.messages = self.storage.load_all_messages()?;
        match self.stream_log.restore()? {
            RestoreOutcome::NoActiveStream => {}
            RestoreOutcome::Deleted { stream_id } => {
                info!(session = %self.name, %stream_id, "deleted stale stream on restore");
            }
            RestoreOutcome::Restored { stream_id, request_id } => {
                info!(session = %self.name, %stream_id, %request_id, "restored orphaned stream, awaiting reconnect");
            }
        }
        Ok(())
    }

    // ── Connections ─────────────────────────────────────────────────────

    pub fn register_connection(&mut self) -> (ConnectionId, tokio::sync::mpsc::UnboundedReceiver<ServerFrame>) {
        self.connections.register()
    }

    pub fn unregister_connection(&mut self, id: ConnectionId) {
        self.connections.unregister(id);
    }

    // ── 4.4.1 Handling a chat request ───────────────────────────────────

    pub async fn handle_chat_request(&mut self, request_id: RequestId, body: ChatRequestBody) -> Result<()> {
        self.messages = reconcile(&self.messages, &body.messages);
        self.persist_all_messages()?;

        let model_messages = self.messages.clone();
        let message_id = MessageId::new();
        self.messages.push(Message::new(message_id, Role::Assistant));

        self.run_model_turn(request_id, message_id, model_messages, body.extra, false)
            .await
    }

    // ── 4.4.2 Cancellation ──────────────────────────────────────────────

    pub fn handle_chat_cancel(&mut self, request_id: &RequestId) {
        if let Some(token) = self.active_requests.lock().get(request_id) {
            debug!(session = %self.name, %request_id, "cancelling in-flight request");
            token.cancel();
        }
    }

    // ── 4.4.3 Tool results ──────────────────────────────────────────────

    pub async fn handle_tool_result(
        &mut self,
        tool_call_id: &str,
        output: serde_json::Value,
        state: Option<String>,
        error_text: Option<String>,
        auto_continue: Option<bool>,
    ) -> Result<()> {
        let Some(message_id) = self
            .locate_tool_part(tool_call_id, |part| {
                !part.tool_state().is_some_and(ToolState::is_terminal)
            })
            .await
        else {
            return Ok(());
        };

        if let Some(message) = self.find_message_mut(message_id) {
            if let Some(Part::Tool {
                state: state_slot,
                output: output_slot,
                error_text: error_slot,
                ..
            }) = message.find_tool_part_mut(tool_call_id)
            {
                if state.as_deref() == Some("output-error") {
                    *state_slot = ToolState::OutputError;
                    *error_slot = Some(error_text.unwrap_or_else(|| DEFAULT_TOOL_ERROR_TEXT.to_string()));
                } else {
                    *state_slot = ToolState::OutputAvailable;
                    *output_slot = Some(output);
                }
            }
        }

        self.tool_cache.mark_processed(tool_call_id);
        self.persist_and_broadcast_update(message_id)?;

        if auto_continue.unwrap_or(false) && self.stream_log.active_stream_id().is_none() {
            self.spawn_continuation().await?;
        }
        Ok(())
    }

    // ── 4.4.4 Tool approvals and continuations ──────────────────────────

    pub async fn handle_tool_approval(
        &mut self,
        tool_call_id: &str,
        approved: bool,
        auto_continue: Option<bool>,
    ) -> Result<()> {
        let Some(message_id) = self
            .locate_tool_part(tool_call_id, |part| {
                !part.tool_state().is_some_and(ToolState::is_terminal)
            })
            .await
        else {
            return Ok(());
        };

        if let Some(message) = self.find_message_mut(message_id) {
            if let Some(Part::Tool {
                state: state_slot,
                approval: approval_slot,
                ..
            }) = message.find_tool_part_mut(tool_call_id)
            {
                match *state_slot {
                    ToolState::ApprovalRequested => {
                        // `approval.id`, once attached, persists through
                        // subsequent transitions (spec §3 invariants).
                        let id = approval_slot.as_ref().and_then(|a| a.id.clone());
                        *approval_slot = Some(chatcore_types::Approval {
                            id,
                            approved: Some(approved),
                        });
                        *state_slot = if approved {
                            ToolState::ApprovalResponded
                        } else {
                            ToolState::OutputDenied
                        };
                    }
                    ToolState::InputAvailable => {
                        // No `tool-approval-request` chunk ever ran for this
                        // part, so there is no id to preserve (spec §4.4.4
                        // step 4: "approved with `approval = { approved }`").
                        *approval_slot = Some(chatcore_types::Approval {
                            id: None,
                            approved: Some(approved),
                        });
                        *state_slot = if approved {
                            ToolState::ApprovalResponded
                        } else {
                            ToolState::OutputDenied
                        };
                    }
                    _ => {}
                }
            }
        }

        self.persist_and_broadcast_update(message_id)?;

        if auto_continue.unwrap_or(false) && self.stream_log.active_stream_id().is_none() {
            self.spawn_continuation().await?;
        }
        Ok(())
    }

    /// Bounded-retry lookup of a tool part by `toolCallId` in the last
    /// assistant message (spec §4.4.3 step 1, §5 timeouts). Returns the
    /// owning message id if found and still eligible (per `eligible`),
    /// `None` if the call drops (not found after retries, or already
    /// terminal per the state guard the caller applies).
    async fn locate_tool_part(
        &mut self,
        tool_call_id: &str,
        eligible: impl Fn(&Part) -> bool,
    ) -> Option<MessageId> {
        for attempt in 0..=self.config.tool_lookup_retries {
            if let Some(message) = self.last_assistant_message() {
                if let Some(part) = message.find_tool_part(tool_call_id) {
                    if !eligible(part) {
                        debug!(%tool_call_id, "tool frame targets an already-terminal part, dropping");
                        return None;
                    }
                    return Some(message.id);
                }
            }
            if attempt < self.config.tool_lookup_retries {
                tokio::time::sleep(self.config.tool_lookup_retry_delay).await;
            }
        }
        warn!(%tool_call_id, "tool frame targets unknown toolCallId after retries, dropping");
        None
    }

    /// Re-invoke the model with the current message history, merging its
    /// output into the previous assistant message rather than starting a new
    /// one (spec §4.4.4).
    async fn spawn_continuation(&mut self) -> Result<()> {
        tokio::time::sleep(self.config.continuation_settle_delay).await;

        let Some(message_id) = self.last_assistant_message().map(|m| m.id) else {
            return Ok(());
        };
        let request_id = RequestId::new(format!("continuation-{}", uuid::Uuid::new_v4()));
        let model_messages = self.messages.clone();
        self.run_model_turn(request_id, message_id, model_messages, Map::new(), true)
            .await
    }

    // ── 4.4.5 Merging client-sent history ───────────────────────────────

    pub fn handle_chat_messages(&mut self, messages: Vec<Message>) -> Result<()> {
        self.messages = reconcile(&self.messages, &messages);
        self.persist_all_messages()?;
        self.connections
            .broadcast(ServerFrame::ChatMessages {
                messages: self.messages.clone(),
            });
        Ok(())
    }

    // ── 4.4.6 Restart and hibernation recovery ──────────────────────────

    pub fn handle_resume_request(&mut self, connection: ConnectionId, request_id: RequestId) {
        self.connections.suspend(connection);
        self.connections
            .send_to(connection, ServerFrame::StreamResuming { id: request_id });
    }

    pub fn handle_resume_ack(&mut self, connection: ConnectionId, request_id: RequestId) -> Result<()> {
        let Some(stream_id) = self.stream_log.active_stream_id() else {
            // Resume ACK for an unknown/no-longer-active request: ignored (spec §7).
            self.connections.resume(connection);
            return Ok(());
        };

        let stored_chunks = self.stream_log.replay(stream_id)?;
        for stored in &stored_chunks {
            self.connections.send_to(
                connection,
                ServerFrame::replay_chunk(request_id.clone(), stored.body.clone()),
            );
        }

        if self.stream_log.is_live() {
            self.connections
                .send_to(connection, ServerFrame::replay_complete(request_id.clone()));
        } else {
            let mut parts = Vec::new();
            for stored in &stored_chunks {
                if let Ok(chunk) = serde_json::from_str::<StreamChunk>(&stored.body) {
                    chunks::apply(&mut parts, &chunk);
                }
            }
            if !parts.is_empty() {
                finalize_terminal_states(&mut parts);
                let mut message = Message::new(MessageId::new(), Role::Assistant);
                message.parts = parts;
                sanitize_message_with_keys(&mut message, &self.config.ephemeral_keys());
                self.storage.upsert_message(&message)?;
                self.messages.push(message);
            }
            self.stream_log.complete(stream_id)?;
            self.connections
                .send_to(connection, ServerFrame::replay_done(request_id.clone()));
        }

        self.connections.resume(connection);
        Ok(())
    }

    // ── 4.4.8 Clear ──────────────────────────────────────────────────────

    pub fn handle_chat_clear(&mut self) -> Result<()> {
        self.messages.clear();
        self.storage.delete_all_messages()?;
        self.stream_log.clear_all()?;
        self.tool_cache.clear();
        self.active_requests.lock().clear();
        self.connections.broadcast(ServerFrame::ChatClear);
        info!(session = %self.name, "session cleared");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Drives one model turn end to end: stream lifecycle, chunk
    /// application, per-chunk persistence and broadcast, and finalization
    /// (spec §4.4.1 steps 2-7; also used for continuations, spec §4.4.4).
    async fn run_model_turn(
        &mut self,
        request_id: RequestId,
        message_id: MessageId,
        model_messages: Vec<Message>,
        extra_body: Map<String, serde_json::Value>,
        continuation: bool,
    ) -> Result<()> {
        let cancel = CancellationToken::new();
        self.active_requests.lock().insert(request_id.clone(), cancel.clone());

        let stream_id = self.stream_log.start(request_id.clone())?;

        if !continuation {
            let start_chunk = StreamChunk::Start {
                message_id: Some(message_id.to_string()),
            };
            self.emit_chunk(&request_id, stream_id, &start_chunk, false)?;
        }

        let mut chunk_stream = self.model.invoke(&model_messages, &extra_body, cancel.clone()).await;
        let mut failure: Option<String> = None;

        while let Some(item) = chunk_stream.next().await {
            match item {
                Ok(chunk) => {
                    self.apply_chunk_to_message(message_id, &chunk);
                    self.emit_chunk(&request_id, stream_id, &chunk, continuation)?;
                }
                Err(err) => {
                    failure = Some(err.0);
                    break;
                }
            }
        }

        self.active_requests.lock().remove(&request_id);

        if let Some(message) = failure {
            warn!(session = %self.name, %request_id, %message, "model invocation failed");
            self.stream_log.mark_error(stream_id)?;
            self.connections
                .broadcast(ServerFrame::error(request_id, message));
            return Ok(());
        }

        if let Some(message) = self.find_message_mut(message_id) {
            finalize_terminal_states(&mut message.parts);
            sanitize_message_with_keys(message, &self.config.ephemeral_keys());
            self.storage.upsert_message(message)?;
        }
        self.stream_log.complete(stream_id)?;

        let terminal = if continuation {
            ServerFrame::ChatResponse {
                id: request_id,
                body: String::new(),
                done: true,
                error: None,
                replay: None,
                replay_complete: None,
                continuation: Some(true),
            }
        } else {
            ServerFrame::done(request_id)
        };
        self.connections.broadcast(terminal);
        self.prune_tool_cache();
        Ok(())
    }

    fn emit_chunk(
        &mut self,
        request_id: &RequestId,
        stream_id: chatcore_types::StreamId,
        chunk: &StreamChunk,
        continuation: bool,
    ) -> Result<()> {
        let body = serde_json::to_string(chunk)?;
        self.stream_log.store(stream_id, body.clone())?;
        let frame = if continuation {
            ServerFrame::continuation_chunk(request_id.clone(), body)
        } else {
            ServerFrame::chunk(request_id.clone(), body)
        };
        self.connections.broadcast(frame);
        Ok(())
    }

    fn apply_chunk_to_message(&mut self, message_id: MessageId, chunk: &StreamChunk) {
        if let Some(message) = self.find_message_mut(message_id) {
            if !chunks::apply(&mut message.parts, chunk) {
                if let StreamChunk::MessageMetadata { metadata } = chunk {
                    message.metadata = Some(metadata.clone());
                }
            }
        }
    }

    fn persist_and_broadcast_update(&mut self, message_id: MessageId) -> Result<()> {
        let message = self
            .find_message_mut(message_id)
            .ok_or(SessionError::MessageNotFound(message_id))?;
        sanitize_message_with_keys(message, &self.config.ephemeral_keys());
        self.storage.upsert_message(message)?;
        let broadcast = message.clone();
        self.connections
            .broadcast(ServerFrame::MessageUpdated { message: broadcast });
        Ok(())
    }

    fn persist_all_messages(&self) -> Result<()> {
        for message in &self.messages {
            self.storage.upsert_message(message)?;
        }
        Ok(())
    }

    fn find_message_mut(&mut self, message_id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Bounds the tool cache's growth (spec §9) by dropping entries for
    /// `toolCallId`s that no longer appear in any persisted message.
    fn prune_tool_cache(&mut self) {
        let known: HashSet<String> = self
            .messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| p.tool_call_id().map(str::to_string))
            .collect();
        self.tool_cache.retain_known(&known);
    }
}

/// Forces any still-`streaming` text/reasoning part to `done`. Defensive:
/// normally the model driver emits an explicit `*-end` chunk for every
/// `*-start`, but a turn that ends (or is cancelled) mid-part must not leave
/// a part permanently stuck in a non-terminal streaming state.
fn finalize_terminal_states(parts: &mut [Part]) {
    for part in parts.iter_mut() {
        match part {
            Part::Text { state, .. } | Part::Reasoning { state, .. } => {
                *state = chatcore_types::TextState::Done;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::ScriptedDriver;
    use chatcore_storage::Storage;

    fn session_with(chunks: Vec<StreamChunk>) -> Session {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let model = Arc::new(ScriptedDriver { chunks });
        Session::new("test", storage, model)
    }

    #[tokio::test]
    async fn happy_path_persists_user_and_assistant_messages() {
        let mut session = session_with(vec![
            StreamChunk::TextStart,
            StreamChunk::TextDelta { delta: "Hello".into() },
            StreamChunk::TextEnd,
        ]);

        session
            .handle_chat_request(
                RequestId::new("r1"),
                ChatRequestBody {
                    messages: vec![Message::user("Hi")],
                    extra: Map::new(),
                },
            )
            .await
            .unwrap();

        assert_eq!(session.messages().len(), 2);
        let assistant = &session.messages()[1];
        assert_eq!(assistant.role, Role::Assistant);
        match &assistant.parts[0] {
            Part::Text { text, state } => {
                assert_eq!(text, "Hello");
                assert_eq!(*state, chatcore_types::TextState::Done);
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_result_merge_transitions_to_output_available() {
        let mut session = session_with(vec![]);
        let mut assistant = Message::new(MessageId::new(), Role::Assistant);
        assistant.parts.push(Part::Tool {
            tool_name: "search".into(),
            tool_call_id: "c1".into(),
            input: Some(serde_json::json!({})),
            output: None,
            error_text: None,
            state: ToolState::InputAvailable,
            approval: None,
            preliminary: None,
            provider_metadata: None,
        });
        session.messages.push(assistant);

        session
            .handle_tool_result("c1", serde_json::json!({"ok": true}), None, None, None)
            .await
            .unwrap();

        assert_eq!(session.messages().len(), 1);
        let part = session.messages()[0].find_tool_part("c1").unwrap();
        assert_eq!(part.tool_state(), Some(ToolState::OutputAvailable));
    }

    #[tokio::test]
    async fn approval_denial_sets_output_denied_preserving_approval_id() {
        let mut session = session_with(vec![]);
        let mut assistant = Message::new(MessageId::new(), Role::Assistant);
        assistant.parts.push(Part::Tool {
            tool_name: "delete".into(),
            tool_call_id: "c2".into(),
            input: Some(serde_json::json!({})),
            output: None,
            error_text: None,
            state: ToolState::ApprovalRequested,
            approval: Some(chatcore_types::Approval {
                id: Some("a1".into()),
                approved: None,
            }),
            preliminary: None,
            provider_metadata: None,
        });
        session.messages.push(assistant);

        session.handle_tool_approval("c2", false, None).await.unwrap();

        let part = session.messages()[0].find_tool_part("c2").unwrap();
        assert_eq!(part.tool_state(), Some(ToolState::OutputDenied));
        match part {
            Part::Tool { approval, .. } => {
                let approval = approval.as_ref().unwrap();
                assert_eq!(approval.id.as_deref(), Some("a1"));
                assert_eq!(approval.approved, Some(false));
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_terminal_tool_output_is_a_no_op() {
        let mut session = session_with(vec![]);
        let mut assistant = Message::new(MessageId::new(), Role::Assistant);
        assistant.parts.push(Part::Tool {
            tool_name: "search".into(),
            tool_call_id: "c3".into(),
            input: None,
            output: Some(serde_json::json!({"first": true})),
            error_text: None,
            state: ToolState::OutputAvailable,
            approval: None,
            preliminary: None,
            provider_metadata: None,
        });
        session.messages.push(assistant);

        session
            .handle_tool_result("c3", serde_json::json!({"second": true}), None, None, None)
            .await
            .unwrap();

        let part = session.messages()[0].find_tool_part("c3").unwrap();
        match part {
            Part::Tool { output, .. } => {
                assert_eq!(output.as_ref().unwrap(), &serde_json::json!({"first": true}));
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[tokio::test]
    async fn clear_empties_store_and_broadcasts() {
        let mut session = session_with(vec![]);
        session.messages.push(Message::user("hi"));
        let (_id, mut rx) = session.register_connection();

        session.handle_chat_clear().unwrap();

        assert!(session.messages().is_empty());
        assert!(session.storage.load_all_messages().unwrap().is_empty());
        match rx.try_recv().unwrap() {
            ServerFrame::ChatClear => {}
            other => panic!("expected ChatClear, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconnect_mid_stream_replays_then_signals_replay_complete_while_live() {
        let mut session = session_with(vec![]);
        let stream_id = session.stream_log.start(RequestId::new("r1")).unwrap();
        session
            .stream_log
            .store(stream_id, "{\"type\":\"text-delta\",\"delta\":\"He\"}".into())
            .unwrap();
        session
            .stream_log
            .store(stream_id, "{\"type\":\"text-delta\",\"delta\":\"llo\"}".into())
            .unwrap();

        let (conn, mut rx) = session.register_connection();
        session.handle_resume_request(conn, RequestId::new("r1"));
        assert!(matches!(rx.try_recv().unwrap(), ServerFrame::StreamResuming { .. }));

        session.handle_resume_ack(conn, RequestId::new("r1")).unwrap();

        let first = rx.try_recv().unwrap();
        assert!(matches!(&first, ServerFrame::ChatResponse { replay: Some(true), .. }));
        let second = rx.try_recv().unwrap();
        assert!(matches!(&second, ServerFrame::ChatResponse { replay: Some(true), .. }));
        let sentinel = rx.try_recv().unwrap();
        match sentinel {
            ServerFrame::ChatResponse {
                done,
                replay_complete,
                body,
                ..
            } => {
                assert!(!done);
                assert_eq!(replay_complete, Some(true));
                assert_eq!(body, "");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hibernation_orphan_reconstructs_and_persists_from_replay_alone() {
        let mut session = session_with(vec![]);

        // Simulate a stream that was mid-flight when the process stopped: write
        // chunks directly through the log, then re-run `restore()` the way a
        // freshly started session would, which always yields `live = false`.
        let stream_id = session.stream_log.start(RequestId::new("r1")).unwrap();
        for chunk in [
            StreamChunk::TextStart,
            StreamChunk::TextDelta { delta: "hi".into() },
            StreamChunk::TextEnd,
        ] {
            session
                .stream_log
                .store(stream_id, serde_json::to_string(&chunk).unwrap())
                .unwrap();
        }
        session.stream_log.restore().unwrap();
        assert!(!session.stream_log.is_live());

        let (conn, mut rx) = session.register_connection();
        session.handle_resume_request(conn, RequestId::new("r1"));
        rx.try_recv().unwrap();
        session.handle_resume_ack(conn, RequestId::new("r1")).unwrap();

        assert_eq!(session.messages().len(), 1);
        let reconstructed = &session.messages()[0];
        match &reconstructed.parts[0] {
            Part::Text { text, .. } => assert_eq!(text, "hi"),
            other => panic!("unexpected part: {other:?}"),
        }
        assert_eq!(
            session.storage.load_all_messages().unwrap().len(),
            1,
            "reconstructed message must be persisted, not just held in memory"
        );

        let mut saw_terminal = false;
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::ChatResponse { done, replay, .. } = frame {
                if done {
                    assert_eq!(replay, Some(true));
                    saw_terminal = true;
                }
            }
        }
        assert!(saw_terminal);
    }

    /// Regression test: a fresh `chat-request` arriving for an orphaned
    /// stream (restored with `live = false`, never resumed) must finalize
    /// that stream's metadata instead of leaving it `streaming` forever
    /// alongside a second `streaming` row (spec §3 invariant 3).
    #[tokio::test]
    async fn chat_request_after_an_orphaned_restore_finalizes_the_orphans_metadata() {
        let mut session = session_with(vec![
            StreamChunk::TextStart,
            StreamChunk::TextDelta { delta: "new".into() },
            StreamChunk::TextEnd,
        ]);

        let orphan_stream_id = session.stream_log.start(RequestId::new("orphan")).unwrap();
        session
            .stream_log
            .store(orphan_stream_id, "{\"type\":\"text-delta\",\"delta\":\"partial\"}".into())
            .unwrap();
        session.stream_log.restore().unwrap();
        assert!(!session.stream_log.is_live());

        session
            .handle_chat_request(
                RequestId::new("r2"),
                ChatRequestBody {
                    messages: vec![Message::user("Hi again")],
                    extra: Map::new(),
                },
            )
            .await
            .unwrap();

        let orphan_meta = session
            .storage
            .load_stream_metadata(orphan_stream_id)
            .unwrap()
            .unwrap();
        assert_eq!(orphan_meta.status, chatcore_storage::StreamStatus::Completed);
        // The new turn runs to completion synchronously against the scripted
        // driver, so by the time `handle_chat_request` returns no stream is
        // active at all, let alone the orphan's.
        assert!(session.stream_log.active_stream_id().is_none());
    }
}
