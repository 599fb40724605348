//! The Resumable Stream Log (spec §4.2): a write-ahead log of emitted
//! chunks per active stream, with a bounded in-memory buffer and the
//! lifecycle metadata needed to replay or reconstruct an in-progress
//! stream after a reconnect or a restart.
//!
//! Owned exclusively by one session's controller task (spec §5): every
//! method here takes `&mut self` rather than locking, since the session is
//! single-threaded cooperative and this log is never shared across
//! sessions.

use std::sync::Arc;
use std::time::Duration;

use chatcore_storage::{Storage, StoredChunk, StreamMetadataRow, StreamStatus};
use chatcore_types::{ChunkId, RequestId, StreamId};

/// Tunables governing buffering, staleness, and retention. Defaults are
/// conservative enough for a single conversational session; override for
/// load-tested deployments.
#[derive(Debug, Clone)]
pub struct StreamLogConfig {
    /// Buffer size at which a flush to storage is triggered.
    pub flush_threshold: usize,
    /// Buffer size that forces an immediate flush mid-burst.
    pub hard_cap: usize,
    /// Chunk bodies larger than this are dropped from the log (still
    /// broadcast live) rather than persisted.
    pub max_chunk_bytes: usize,
    /// A `streaming` stream found on restore older than this is considered
    /// abandoned and deleted rather than resumed.
    pub stale_threshold: Duration,
    /// Completed/errored streams older than this are eligible for cleanup.
    pub retention: Duration,
}

impl Default for StreamLogConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 32,
            hard_cap: 256,
            max_chunk_bytes: 64 * 1024,
            stale_threshold: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveStream {
    stream_id: StreamId,
    request_id: RequestId,
    next_index: i64,
    /// Whether a producer is actively emitting into this stream right now.
    /// `false` for a stream restored from a hibernated session with no
    /// attached model invocation yet (spec §4.4.6).
    live: bool,
}

/// Outcome of [`StreamLog::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    NoActiveStream,
    /// A `streaming` stream was found but exceeded the stale threshold and
    /// was deleted.
    Deleted { stream_id: StreamId },
    /// A `streaming` stream was found and re-populated as the active
    /// stream, `live = false` until a new model invocation attaches.
    Restored {
        stream_id: StreamId,
        request_id: RequestId,
    },
}

pub struct StreamLog {
    storage: Arc<Storage>,
    config: StreamLogConfig,
    active: Option<ActiveStream>,
    buffer: Vec<StoredChunk>,
    flushing: bool,
}

impl StreamLog {
    pub fn new(storage: Arc<Storage>, config: StreamLogConfig) -> Self {
        Self {
            storage,
            config,
            active: None,
            buffer: Vec::new(),
            flushing: false,
        }
    }

    /// The currently active stream, if any.
    pub fn active_stream_id(&self) -> Option<StreamId> {
        self.active.as_ref().map(|a| a.stream_id)
    }

    /// Whether the active stream (if any) has a live producer attached.
    pub fn is_live(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.live)
    }

    /// Marks the active stream live, e.g. when a continuation attaches to
    /// an orphaned stream.
    pub fn mark_live(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.live = true;
        }
    }

    /// Flushes any pending buffered chunks from a prior stream, finalizes
    /// that prior stream's metadata so at most one `streaming` row ever
    /// exists (spec §3, invariant 3), then allocates a fresh `streamId` and
    /// records `(streaming, now)` metadata.
    pub fn start(&mut self, request_id: RequestId) -> chatcore_storage::Result<StreamId> {
        self.flush()?;

        if let Some(prev) = self.active.take() {
            tracing::debug!(
                stream_id = %prev.stream_id,
                "finalizing prior stream before starting a new one"
            );
            self.transition(prev.stream_id, StreamStatus::Completed)?;
        }

        let stream_id = StreamId::new();
        let now = now_millis();
        self.storage.upsert_stream_metadata(&StreamMetadataRow {
            stream_id,
            request_id: request_id.clone(),
            status: StreamStatus::Streaming,
            created_at: now,
            completed_at: None,
        })?;
        self.active = Some(ActiveStream {
            stream_id,
            request_id,
            next_index: 0,
            live: true,
        });
        Ok(stream_id)
    }

    /// Appends a chunk body to the in-memory buffer under the stream's
    /// monotonic index. Oversized bodies are dropped from the log but the
    /// caller still broadcasts them live (spec §4.1, §7).
    pub fn store(&mut self, stream_id: StreamId, body: String) -> chatcore_storage::Result<()> {
        let Some(active) = self.active.as_mut().filter(|a| a.stream_id == stream_id) else {
            tracing::warn!(%stream_id, "store() for a stream that is not active, dropping");
            return Ok(());
        };

        let index = active.next_index;
        active.next_index += 1;

        if body.len() > self.config.max_chunk_bytes {
            tracing::warn!(
                %stream_id,
                index,
                size = body.len(),
                "chunk exceeds per-row byte cap, dropping from log"
            );
            return Ok(());
        }

        self.buffer.push(StoredChunk {
            chunk_id: ChunkId::new(),
            stream_id,
            body,
            chunk_index: index,
            created_at: now_millis(),
        });

        if self.buffer.len() >= self.config.flush_threshold
            || self.buffer.len() >= self.config.hard_cap
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes, transitions metadata to `completed`, clears active state,
    /// and runs retention cleanup.
    pub fn complete(&mut self, stream_id: StreamId) -> chatcore_storage::Result<()> {
        self.flush()?;
        self.transition(stream_id, StreamStatus::Completed)?;
        if self.active_stream_id() == Some(stream_id) {
            self.active = None;
        }
        self.cleanup_retention()?;
        Ok(())
    }

    /// Flushes, transitions metadata to `error`, clears active state.
    pub fn mark_error(&mut self, stream_id: StreamId) -> chatcore_storage::Result<()> {
        self.flush()?;
        self.transition(stream_id, StreamStatus::Error)?;
        if self.active_stream_id() == Some(stream_id) {
            self.active = None;
        }
        self.cleanup_retention()?;
        Ok(())
    }

    fn transition(
        &self,
        stream_id: StreamId,
        status: StreamStatus,
    ) -> chatcore_storage::Result<()> {
        self.storage.run(
            "UPDATE stream_metadata SET status = ?1, completed_at = ?2 WHERE stream_id = ?3",
            rusqlite::params![status.as_str(), now_millis(), stream_id.to_string()],
        )?;
        Ok(())
    }

    fn cleanup_retention(&self) -> chatcore_storage::Result<()> {
        let cutoff = now_millis() - self.config.retention.as_millis() as i64;
        self.storage.cleanup_completed_streams_before(cutoff)
    }

    /// Flushes, then returns every stored chunk for `stream_id` in
    /// ascending index order. The caller (Session Controller) tags each as
    /// `replay = true` when forwarding to a connection.
    pub fn replay(&mut self, stream_id: StreamId) -> chatcore_storage::Result<Vec<StoredChunk>> {
        self.flush()?;
        self.storage.load_stream_chunks(stream_id)
    }

    /// On session wake, locates the most recent `streaming` stream and
    /// either deletes it (stale) or restores it as the active stream with
    /// `live = false` (spec §4.4.6).
    pub fn restore(&mut self) -> chatcore_storage::Result<RestoreOutcome> {
        let Some(meta) = self.storage.load_active_stream()? else {
            return Ok(RestoreOutcome::NoActiveStream);
        };

        let age_ms = (now_millis() - meta.created_at).max(0) as u64;
        if Duration::from_millis(age_ms) > self.config.stale_threshold {
            self.storage.delete_stream_chunks(meta.stream_id)?;
            self.storage.delete_stream_metadata(meta.stream_id)?;
            return Ok(RestoreOutcome::Deleted {
                stream_id: meta.stream_id,
            });
        }

        let chunks = self.storage.load_stream_chunks(meta.stream_id)?;
        let next_index = chunks.last().map(|c| c.chunk_index + 1).unwrap_or(0);
        self.active = Some(ActiveStream {
            stream_id: meta.stream_id,
            request_id: meta.request_id.clone(),
            next_index,
            live: false,
        });
        Ok(RestoreOutcome::Restored {
            stream_id: meta.stream_id,
            request_id: meta.request_id,
        })
    }

    /// Drops all chunks, metadata, active state, and the buffer for this
    /// session's log tables. Called alongside clearing the Message Store
    /// on `chat-clear` (spec §4.4.8).
    pub fn clear_all(&mut self) -> chatcore_storage::Result<()> {
        self.buffer.clear();
        self.active = None;
        self.storage.run("DELETE FROM stream_chunks", [])?;
        self.storage.run("DELETE FROM stream_metadata", [])?;
        Ok(())
    }

    /// Flushes the buffer to persistent storage in one batch. Non-reentrant:
    /// a flush already in progress is skipped rather than run concurrently.
    fn flush(&mut self) -> chatcore_storage::Result<()> {
        if self.flushing || self.buffer.is_empty() {
            return Ok(());
        }
        self.flushing = true;
        let result = self.storage.insert_stream_chunks(&self.buffer);
        self.flushing = false;
        if result.is_ok() {
            self.buffer.clear();
        }
        result
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(config: StreamLogConfig) -> StreamLog {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        StreamLog::new(storage, config)
    }

    #[test]
    fn start_then_store_then_complete_round_trips_through_replay() {
        let mut log = log_with(StreamLogConfig::default());
        let stream_id = log.start(RequestId::new("r1")).unwrap();

        log.store(stream_id, "{\"type\":\"text-delta\"}".into())
            .unwrap();
        log.store(stream_id, "{\"type\":\"text-end\"}".into())
            .unwrap();
        log.complete(stream_id).unwrap();

        let replayed = log.replay(stream_id).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].chunk_index, 0);
        assert_eq!(replayed[1].chunk_index, 1);
    }

    #[test]
    fn starting_a_new_stream_flushes_the_prior_buffer() {
        let mut log = log_with(StreamLogConfig::default());
        let first = log.start(RequestId::new("r1")).unwrap();
        log.store(first, "pending".into()).unwrap();

        let _second = log.start(RequestId::new("r2")).unwrap();

        let replayed = log.replay(first).unwrap();
        assert_eq!(replayed.len(), 1);
    }

    /// Regression test: spec invariant 3 requires exactly one `streaming`
    /// row per session at any time. `start()` must finalize a still-active
    /// prior stream's metadata (e.g. an orphaned stream repopulated by
    /// `restore()`) rather than leaving it `streaming` forever while a
    /// second `streaming` row is inserted alongside it.
    #[test]
    fn starting_a_new_stream_finalizes_the_prior_streams_metadata() {
        let mut log = log_with(StreamLogConfig::default());
        let first = log.start(RequestId::new("r1")).unwrap();

        let second = log.start(RequestId::new("r2")).unwrap();

        let first_meta = log.storage.load_stream_metadata(first).unwrap().unwrap();
        assert_eq!(first_meta.status, StreamStatus::Completed);

        let active = log.storage.load_active_stream().unwrap().unwrap();
        assert_eq!(active.stream_id, second);
    }

    #[test]
    fn oversized_chunk_is_dropped_from_log() {
        let mut log = log_with(StreamLogConfig {
            max_chunk_bytes: 4,
            ..StreamLogConfig::default()
        });
        let stream_id = log.start(RequestId::new("r1")).unwrap();
        log.store(stream_id, "this is too long".into()).unwrap();

        let replayed = log.replay(stream_id).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn hard_cap_forces_flush_mid_burst() {
        let mut log = log_with(StreamLogConfig {
            flush_threshold: 1000,
            hard_cap: 2,
            ..StreamLogConfig::default()
        });
        let stream_id = log.start(RequestId::new("r1")).unwrap();
        log.store(stream_id, "a".into()).unwrap();
        log.store(stream_id, "b".into()).unwrap();

        // Flushed without calling complete/replay's own flush, because the
        // buffer hit hard_cap.
        let replayed = log.storage.load_stream_chunks(stream_id).unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn restore_deletes_stale_streaming_stream() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let stream_id = StreamId::new();
        storage
            .upsert_stream_metadata(&StreamMetadataRow {
                stream_id,
                request_id: RequestId::new("r1"),
                status: StreamStatus::Streaming,
                created_at: now_millis() - 10_000_000,
                completed_at: None,
            })
            .unwrap();

        let mut log = StreamLog::new(
            storage.clone(),
            StreamLogConfig {
                stale_threshold: Duration::from_secs(60),
                ..StreamLogConfig::default()
            },
        );
        let outcome = log.restore().unwrap();
        assert_eq!(outcome, RestoreOutcome::Deleted { stream_id });
        assert!(storage.load_stream_metadata(stream_id).unwrap().is_none());
    }

    #[test]
    fn restore_repopulates_fresh_streaming_stream_as_not_live() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let stream_id = StreamId::new();
        storage
            .upsert_stream_metadata(&StreamMetadataRow {
                stream_id,
                request_id: RequestId::new("r1"),
                status: StreamStatus::Streaming,
                created_at: now_millis(),
                completed_at: None,
            })
            .unwrap();
        storage
            .insert_stream_chunks(&[StoredChunk {
                chunk_id: ChunkId::new(),
                stream_id,
                body: "x".into(),
                chunk_index: 0,
                created_at: now_millis(),
            }])
            .unwrap();

        let mut log = StreamLog::new(storage, StreamLogConfig::default());
        let outcome = log.restore().unwrap();
        assert_eq!(
            outcome,
            RestoreOutcome::Restored {
                stream_id,
                request_id: RequestId::new("r1"),
            }
        );
        assert!(!log.is_live());
        assert_eq!(log.active_stream_id(), Some(stream_id));
    }

    #[test]
    fn clear_all_empties_buffer_and_tables() {
        let mut log = log_with(StreamLogConfig::default());
        let stream_id = log.start(RequestId::new("r1")).unwrap();
        log.store(stream_id, "x".into()).unwrap();

        log.clear_all().unwrap();

        assert!(log.active_stream_id().is_none());
        assert!(log.storage.load_stream_chunks(stream_id).unwrap().is_empty());
    }
}
