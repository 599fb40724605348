//! `Message`, the persisted unit of the Message Store (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::MessageId;
use crate::part::Part;

/// Role of the message's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A message in the conversation. Immutable once its owning stream has
/// completed, except through the explicit merge operations in the
/// reconciliation algorithm and the in-place tool-result/approval mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(id: MessageId, role: Role) -> Self {
        Self {
            id,
            role,
            parts: Vec::new(),
            metadata: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        let mut m = Self::new(MessageId::new(), Role::User);
        m.parts.push(Part::Text {
            text: text.into(),
            state: crate::part::TextState::Done,
        });
        m
    }

    /// Find a tool part by `toolCallId`, searching from the end (spec §4.1:
    /// "Lookups search from the end of `parts`").
    pub fn find_tool_part_mut(&mut self, tool_call_id: &str) -> Option<&mut Part> {
        self.parts
            .iter_mut()
            .rev()
            .find(|p| p.tool_call_id() == Some(tool_call_id))
    }

    pub fn find_tool_part(&self, tool_call_id: &str) -> Option<&Part> {
        self.parts
            .iter()
            .rev()
            .find(|p| p.tool_call_id() == Some(tool_call_id))
    }

    /// Whether every part in this message is one of the terminal states.
    pub fn is_terminal(&self) -> bool {
        self.parts.iter().all(|p| match p {
            Part::Text { state, .. } | Part::Reasoning { state, .. } => {
                *state == crate::part::TextState::Done
            }
            Part::Tool { state, .. } => state.is_terminal(),
            _ => true,
        })
    }
}
