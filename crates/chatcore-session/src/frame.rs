//! Wire frame taxonomy (spec §4.3). Every frame is a JSON object carrying
//! `type`; request-scoped frames also carry `id` (the `requestId`).

use chatcore_types::{Message, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a `chat-request` frame: `{ messages, ...extraBody }` (spec §6).
/// Additional fields beyond `messages` are opaque and passed through to the
/// model handler untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequestInit {
    pub body: ChatRequestBody,
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    ChatRequest {
        id: RequestId,
        init: ChatRequestInit,
    },
    ChatCancel {
        id: RequestId,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: Value,
        #[serde(default)]
        state: Option<String>,
        #[serde(rename = "errorText", default)]
        error_text: Option<String>,
        #[serde(rename = "autoContinue", default)]
        auto_continue: Option<bool>,
    },
    ToolApproval {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        approved: bool,
        #[serde(rename = "autoContinue", default)]
        auto_continue: Option<bool>,
    },
    ChatClear,
    ChatMessages {
        messages: Vec<Message>,
    },
    ResumeRequest {
        id: RequestId,
    },
    ResumeAck {
        id: RequestId,
    },
}

/// Frames the server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    ChatResponse {
        id: RequestId,
        body: String,
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        replay: Option<bool>,
        #[serde(
            rename = "replayComplete",
            skip_serializing_if = "Option::is_none",
            default
        )]
        replay_complete: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        continuation: Option<bool>,
    },
    StreamResuming {
        id: RequestId,
    },
    ChatClear,
    ChatMessages {
        messages: Vec<Message>,
    },
    MessageUpdated {
        message: Message,
    },
}

impl ServerFrame {
    /// One live, non-terminal chunk of a response.
    pub fn chunk(id: RequestId, body: String) -> Self {
        ServerFrame::ChatResponse {
            id,
            body,
            done: false,
            error: None,
            replay: None,
            replay_complete: None,
            continuation: None,
        }
    }

    /// Same as [`Self::chunk`] but tagged as belonging to a continuation of
    /// the previous assistant message (spec §4.4.4).
    pub fn continuation_chunk(id: RequestId, body: String) -> Self {
        ServerFrame::ChatResponse {
            id,
            body,
            done: false,
            error: None,
            replay: None,
            replay_complete: None,
            continuation: Some(true),
        }
    }

    /// One replayed chunk of a stored stream (spec §4.2 `replay`).
    pub fn replay_chunk(id: RequestId, body: String) -> Self {
        ServerFrame::ChatResponse {
            id,
            body,
            done: false,
            error: None,
            replay: Some(true),
            replay_complete: None,
            continuation: None,
        }
    }

    /// The sentinel marking the end of replay for a stream that is still
    /// live (spec §4.4.6): `done: false, replayComplete: true, body: ""`.
    pub fn replay_complete(id: RequestId) -> Self {
        ServerFrame::ChatResponse {
            id,
            body: String::new(),
            done: false,
            error: None,
            replay: None,
            replay_complete: Some(true),
            continuation: None,
        }
    }

    /// Successful terminal frame.
    pub fn done(id: RequestId) -> Self {
        ServerFrame::ChatResponse {
            id,
            body: String::new(),
            done: true,
            error: None,
            replay: None,
            replay_complete: None,
            continuation: None,
        }
    }

    /// Terminal frame after a stream reconstructed purely from replay
    /// (spec §4.4.6 orphaned-stream case): `replay: true, done: true`.
    pub fn replay_done(id: RequestId) -> Self {
        ServerFrame::ChatResponse {
            id,
            body: String::new(),
            done: true,
            error: None,
            replay: Some(true),
            replay_complete: None,
            continuation: None,
        }
    }

    /// Terminal error frame (spec §4.4.1, §7).
    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        ServerFrame::ChatResponse {
            id,
            body: message.into(),
            done: true,
            error: Some(true),
            replay: None,
            replay_complete: None,
            continuation: None,
        }
    }
}
