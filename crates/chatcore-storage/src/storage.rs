//! SQLite-backed persistence for the Message Store and Resumable Stream Log
//! (spec §6, §9).
//!
//! The source this spec was distilled from leaned on a host runtime's
//! ambient tagged-template SQL API. Here persistence is an explicit, narrow
//! surface: [`Storage::run`] executes a statement, [`Storage::query`] runs
//! one and maps every row. Every domain-specific accessor below is built
//! from those two primitives; nothing reaches into the connection directly.

use std::path::Path;
use std::sync::Mutex;

use chatcore_types::{ChunkId, Message, RequestId, StreamId};
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::model::{StoredChunk, StreamMetadataRow, StreamStatus};

const SCHEMA_VERSION: i32 = 1;

pub struct Storage {
    conn: Mutex<Connection>,
}

// All access goes through `Mutex<Connection>`, serialized the same way the
// session actor already serializes every other mutation of session state.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Migration(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        info!(path = %path.display(), "chat storage opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.create_schema(&conn)?;
        Ok(())
    }

    fn create_schema(&self, conn: &Connection) -> Result<()> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!(version = current_version, "chat storage schema up to date");
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                row_created_at INTEGER NOT NULL,
                payload BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_row_created_at
                ON messages(row_created_at);

            CREATE TABLE IF NOT EXISTS stream_chunks (
                chunk_id TEXT PRIMARY KEY,
                stream_id TEXT NOT NULL,
                body TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stream_chunks_stream_index
                ON stream_chunks(stream_id, chunk_index);

            CREATE TABLE IF NOT EXISTS stream_metadata (
                stream_id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_stream_metadata_status
                ON stream_metadata(status, created_at);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(version = SCHEMA_VERSION, "chat storage schema created");
        Ok(())
    }
}

impl Storage {
    /// Execute one statement, narrow persistence primitive (spec §9).
    pub fn run(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(sql, params)?)
    }

    /// Run a query and map every row, narrow persistence primitive (spec §9).
    pub fn query<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        mut map_row: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| map_row(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }
}

// ── Message Store ───────────────────────────────────────────────────────

impl Storage {
    /// Insert or replace a message, preserving its original `row_created_at`
    /// so the conversation order survives in-place tool-result mutations.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let now = chrono::Utc::now().timestamp_millis();
        self.run(
            "INSERT INTO messages (id, row_created_at, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            rusqlite::params![message.id.to_string(), now, payload],
        )?;
        Ok(())
    }

    /// All messages in original insertion order.
    pub fn load_all_messages(&self) -> Result<Vec<Message>> {
        let rows: Vec<Vec<u8>> = self.query(
            "SELECT payload FROM messages ORDER BY row_created_at ASC",
            [],
            |row| row.get(0),
        )?;
        rows.into_iter()
            .map(|payload| serde_json::from_slice(&payload).map_err(StorageError::from))
            .collect()
    }

    pub fn delete_all_messages(&self) -> Result<()> {
        self.run("DELETE FROM messages", [])?;
        Ok(())
    }
}

// ── Resumable Stream Log ────────────────────────────────────────────────

impl Storage {
    pub fn insert_stream_chunk(&self, chunk: &StoredChunk) -> Result<()> {
        self.run(
            "INSERT INTO stream_chunks (chunk_id, stream_id, body, chunk_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                chunk.chunk_id.to_string(),
                chunk.stream_id.to_string(),
                chunk.body,
                chunk.chunk_index,
                chunk.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_stream_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        self.with_transaction(|conn| {
            for chunk in chunks {
                conn.execute(
                    "INSERT INTO stream_chunks (chunk_id, stream_id, body, chunk_index, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        chunk.chunk_id.to_string(),
                        chunk.stream_id.to_string(),
                        chunk.body,
                        chunk.chunk_index,
                        chunk.created_at,
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn load_stream_chunks(&self, stream_id: StreamId) -> Result<Vec<StoredChunk>> {
        self.query(
            "SELECT chunk_id, stream_id, body, chunk_index, created_at
             FROM stream_chunks WHERE stream_id = ?1 ORDER BY chunk_index ASC",
            rusqlite::params![stream_id.to_string()],
            row_to_stored_chunk,
        )
    }

    pub fn delete_stream_chunks(&self, stream_id: StreamId) -> Result<()> {
        self.run(
            "DELETE FROM stream_chunks WHERE stream_id = ?1",
            rusqlite::params![stream_id.to_string()],
        )?;
        Ok(())
    }

    pub fn upsert_stream_metadata(&self, meta: &StreamMetadataRow) -> Result<()> {
        self.run(
            "INSERT INTO stream_metadata (stream_id, request_id, status, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(stream_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at",
            rusqlite::params![
                meta.stream_id.to_string(),
                meta.request_id.as_str(),
                meta.status.as_str(),
                meta.created_at,
                meta.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn load_stream_metadata(&self, stream_id: StreamId) -> Result<Option<StreamMetadataRow>> {
        let rows = self.query(
            "SELECT stream_id, request_id, status, created_at, completed_at
             FROM stream_metadata WHERE stream_id = ?1",
            rusqlite::params![stream_id.to_string()],
            row_to_stream_metadata,
        )?;
        Ok(rows.into_iter().next())
    }

    /// The most recent stream still `streaming`, if any (spec §4.4.6 restore).
    pub fn load_active_stream(&self) -> Result<Option<StreamMetadataRow>> {
        let rows = self.query(
            "SELECT stream_id, request_id, status, created_at, completed_at
             FROM stream_metadata WHERE status = 'streaming'
             ORDER BY created_at DESC LIMIT 1",
            [],
            row_to_stream_metadata,
        )?;
        Ok(rows.into_iter().next())
    }

    pub fn delete_stream_metadata(&self, stream_id: StreamId) -> Result<()> {
        self.run(
            "DELETE FROM stream_metadata WHERE stream_id = ?1",
            rusqlite::params![stream_id.to_string()],
        )?;
        Ok(())
    }

    /// Deletes chunks and metadata for completed/errored streams whose
    /// `completed_at` predates `cutoff_ms` (spec §4.2 retention cleanup).
    pub fn cleanup_completed_streams_before(&self, cutoff_ms: i64) -> Result<()> {
        self.with_transaction(|conn| {
            conn.execute(
                "DELETE FROM stream_chunks WHERE stream_id IN (
                    SELECT stream_id FROM stream_metadata
                    WHERE status != 'streaming' AND completed_at IS NOT NULL AND completed_at < ?1
                 )",
                rusqlite::params![cutoff_ms],
            )?;
            conn.execute(
                "DELETE FROM stream_metadata
                 WHERE status != 'streaming' AND completed_at IS NOT NULL AND completed_at < ?1",
                rusqlite::params![cutoff_ms],
            )?;
            Ok(())
        })
    }

    /// Empties all three tables (spec §4.4.8 clear, invariant 8).
    pub fn clear_all(&self) -> Result<()> {
        self.with_transaction(|conn| {
            conn.execute("DELETE FROM messages", [])?;
            conn.execute("DELETE FROM stream_chunks", [])?;
            conn.execute("DELETE FROM stream_metadata", [])?;
            Ok(())
        })
    }
}

fn row_to_stored_chunk(row: &Row<'_>) -> rusqlite::Result<StoredChunk> {
    let chunk_id: String = row.get(0)?;
    let stream_id: String = row.get(1)?;
    Ok(StoredChunk {
        chunk_id: parse_uuid_column(0, &chunk_id)?,
        stream_id: parse_uuid_column(1, &stream_id)?,
        body: row.get(2)?,
        chunk_index: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_stream_metadata(row: &Row<'_>) -> rusqlite::Result<StreamMetadataRow> {
    let stream_id: String = row.get(0)?;
    let request_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(StreamMetadataRow {
        stream_id: parse_uuid_column(0, &stream_id)?,
        request_id: RequestId::new(request_id),
        status: StreamStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown stream status {status:?}").into(),
            )
        })?,
        created_at: row.get(3)?,
        completed_at: row.get(4)?,
    })
}

fn parse_uuid_column<T: std::str::FromStr>(idx: usize, s: &str) -> rusqlite::Result<T> {
    s.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid id {s:?}").into(),
        )
    })
}
