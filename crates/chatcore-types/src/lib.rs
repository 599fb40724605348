//! Data model for the resumable chat-streaming core: messages, parts, and
//! the sanitization pass applied before persistence.

pub mod ids;
pub mod message;
pub mod part;
pub mod sanitize;

pub use ids::{ChunkId, MessageId, RequestId, StreamId};
pub use message::{Message, Role};
pub use part::{Approval, Part, TextState, ToolState};
pub use sanitize::{sanitize_message, sanitize_message_with_keys, DEFAULT_EPHEMERAL_KEYS};
