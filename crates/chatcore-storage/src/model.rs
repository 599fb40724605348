//! Row types for the three persisted tables (spec §6).

use chatcore_types::{ChunkId, RequestId, StreamId};

/// `stream_metadata.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Streaming,
    Completed,
    Error,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Streaming => "streaming",
            StreamStatus::Completed => "completed",
            StreamStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "streaming" => Some(StreamStatus::Streaming),
            "completed" => Some(StreamStatus::Completed),
            "error" => Some(StreamStatus::Error),
            _ => None,
        }
    }
}

/// One row of `stream_metadata`.
#[derive(Debug, Clone)]
pub struct StreamMetadataRow {
    pub stream_id: StreamId,
    pub request_id: RequestId,
    pub status: StreamStatus,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// One row of `stream_chunks`.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: ChunkId,
    pub stream_id: StreamId,
    pub body: String,
    pub chunk_index: i64,
    pub created_at: i64,
}
