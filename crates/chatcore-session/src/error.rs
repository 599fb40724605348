//! Crate error type (spec §7): one enum per crate boundary, `#[from]`
//! conversions at the edges, following the usual one-error-enum-per-crate
//! convention for a `thiserror`-based library.

use chatcore_types::RequestId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Storage(#[from] chatcore_storage::StorageError),

    #[error("model driver error: {0}")]
    Model(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request {0} is not active")]
    RequestNotActive(RequestId),

    #[error("message {0} not found")]
    MessageNotFound(chatcore_types::MessageId),

    #[error("session actor channel closed")]
    ActorGone,
}

pub type Result<T> = std::result::Result<T, SessionError>;
