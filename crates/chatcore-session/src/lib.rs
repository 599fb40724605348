//! The Session Controller and Connection Set (spec §4.3, §4.4): the
//! resumable chat-streaming protocol's state machine, independent of any
//! particular transport.

pub mod actor;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod frame;
pub mod merge;
pub mod model;
pub mod tool_cache;

pub use actor::SessionHandle;
pub use config::SessionConfig;
pub use connection::{ConnectionId, ConnectionSet};
pub use controller::Session;
pub use error::{Result, SessionError};
pub use frame::{ChatRequestBody, ChatRequestInit, ClientFrame, ServerFrame};
pub use model::{ChunkStream, ModelDriver, ModelError};
