//! Crate-level integration suite for the Resumable Stream Log, backed by a
//! real on-disk SQLite file (spec §4.2, §6) rather than the in-process unit
//! tests in `src/log.rs`, which mostly exercise `Storage::open_in_memory`.

use std::sync::Arc;
use std::time::Duration;

use chatcore_storage::Storage;
use chatcore_streamlog::{RestoreOutcome, StreamLog, StreamLogConfig};
use chatcore_types::RequestId;

fn storage_on_disk(dir: &tempfile::TempDir) -> Arc<Storage> {
    Arc::new(Storage::open(dir.path().join("session.sqlite3")).unwrap())
}

#[test]
fn chunks_survive_reopening_the_same_database_file() {
    let dir = tempfile::tempdir().unwrap();

    let stream_id = {
        let storage = storage_on_disk(&dir);
        let mut log = StreamLog::new(storage, StreamLogConfig::default());
        let stream_id = log.start(RequestId::new("r1")).unwrap();
        log.store(stream_id, "{\"type\":\"text-start\"}".into()).unwrap();
        log.store(stream_id, "{\"type\":\"text-delta\",\"delta\":\"hi\"}".into())
            .unwrap();
        log.complete(stream_id).unwrap();
        stream_id
    };

    // Reopen against the same file, as a freshly restarted process would.
    let storage = storage_on_disk(&dir);
    let mut log = StreamLog::new(storage, StreamLogConfig::default());
    let replayed = log.replay(stream_id).unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0].chunk_index, 0);
    assert_eq!(replayed[1].chunk_index, 1);
}

#[test]
fn restore_on_a_fresh_process_repopulates_an_orphaned_stream_as_not_live() {
    let dir = tempfile::tempdir().unwrap();

    let (stream_id, request_id) = {
        let storage = storage_on_disk(&dir);
        let mut log = StreamLog::new(storage, StreamLogConfig::default());
        let stream_id = log.start(RequestId::new("orphan")).unwrap();
        log.store(stream_id, "{\"type\":\"text-delta\",\"delta\":\"partial\"}".into())
            .unwrap();
        // Deliberately never call complete()/mark_error(): simulates a
        // process that stopped mid-stream.
        (stream_id, RequestId::new("orphan"))
    };

    let storage = storage_on_disk(&dir);
    let mut log = StreamLog::new(storage, StreamLogConfig::default());
    let outcome = log.restore().unwrap();
    assert_eq!(
        outcome,
        RestoreOutcome::Restored {
            stream_id,
            request_id,
        }
    );
    assert!(!log.is_live());

    let replayed = log.replay(stream_id).unwrap();
    assert_eq!(replayed.len(), 1);
}

#[test]
fn restore_deletes_a_streaming_stream_older_than_the_stale_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_on_disk(&dir);

    // Write metadata directly with a created_at far in the past, since the
    // stale check compares against wall-clock time.
    storage
        .upsert_stream_metadata(&chatcore_storage::StreamMetadataRow {
            stream_id: chatcore_types::StreamId::new(),
            request_id: RequestId::new("stale"),
            status: chatcore_storage::StreamStatus::Streaming,
            created_at: chrono::Utc::now().timestamp_millis() - Duration::from_secs(3600).as_millis() as i64,
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
    assert!(matches!(outcome, RestoreOutcome::Deleted { .. }));
    assert!(log.active_stream_id().is_none());
}

#[test]
fn flush_threshold_and_hard_cap_both_persist_chunks_without_an_explicit_complete() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_on_disk(&dir);
    let mut log = StreamLog::new(
        storage.clone(),
        StreamLogConfig {
            flush_threshold: 2,
            hard_cap: 8,
            ..StreamLogConfig::default()
        },
    );

    let stream_id = log.start(RequestId::new("r1")).unwrap();
    for i in 0..3 {
        log.store(stream_id, format!("chunk-{i}")).unwrap();
    }

    // Buffer crossed `flush_threshold` mid-burst; the row should already be
    // on disk even though `complete`/`replay` haven't been called yet.
    let persisted = storage.load_stream_chunks(stream_id).unwrap();
    assert!(persisted.len() >= 2, "expected an eager flush once past the threshold");
}
