//! Bounded LRU + TTL registry of resident session actors (AMBIENT STACK:
//! "Bounded LRU cache of session actors with TTL eviction"): an
//! `Arc<RwLock<...>>`-guarded `lru::LruCache` of live `SessionHandle`s, each
//! backing its own actor task and SQLite file. The last-touched instant is
//! folded into the cache entry itself rather than tracked in a separate
//! structure, since every touch already holds the write lock the LRU bump
//! needs.
//!
//! Evicting a session here only drops the handle — the actor task notices
//! its channel has no more senders and exits on its own, exactly like
//! dropping the last `Arc<SessionHandle>` anywhere else. Storage is durable,
//! so a reconnecting client simply triggers `restore()` again on respawn,
//! the same recovery path used after a process restart (spec §4.4.6).

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use chatcore_session::{ModelDriver, SessionConfig, SessionHandle};
use chatcore_storage::Storage;

use crate::error::{Result, ServerError};

struct Entry {
    handle: SessionHandle,
    touched_at: Instant,
}

struct Inner {
    cache: LruCache<String, Entry>,
}

/// Registry of resident session actors, bounded by count and by idle TTL.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
    model: Arc<dyn ModelDriver>,
    session_config: SessionConfig,
    data_dir: Option<std::path::PathBuf>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        max_resident: usize,
        ttl: Duration,
        model: Arc<dyn ModelDriver>,
        session_config: SessionConfig,
        data_dir: Option<std::path::PathBuf>,
    ) -> Self {
        let cap = NonZeroUsize::new(max_resident).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Arc::new(RwLock::new(Inner {
                cache: LruCache::new(cap),
            })),
            model,
            session_config,
            data_dir,
            ttl,
        }
    }

    /// Look up a resident session by name, or spawn a fresh actor for it.
    /// Spawning opens (or creates) that session's SQLite file and restores
    /// any persisted messages / orphaned stream before the actor starts
    /// accepting commands (spec §4.4.6), mirroring process-restart recovery.
    pub async fn get_or_create(&self, name: &str) -> Result<SessionHandle> {
        {
            let mut inner = self.inner.write().await;
            if let Some(entry) = inner.cache.get_mut(name) {
                entry.touched_at = Instant::now();
                return Ok(entry.handle.clone());
            }
        }

        let storage = Arc::new(self.open_storage(name)?);
        let handle = SessionHandle::spawn_with_config(
            name.to_string(),
            storage,
            Arc::clone(&self.model),
            self.session_config.clone(),
        );

        let mut inner = self.inner.write().await;
        // Another task may have raced us to create the same session; prefer
        // whichever actor is already cached so only one actor owns the file.
        if let Some(entry) = inner.cache.get_mut(name) {
            entry.touched_at = Instant::now();
            return Ok(entry.handle.clone());
        }
        inner.cache.put(
            name.to_string(),
            Entry {
                handle: handle.clone(),
                touched_at: Instant::now(),
            },
        );
        debug!(session = name, resident = inner.cache.len(), "session actor spawned");
        Ok(handle)
    }

    fn open_storage(&self, name: &str) -> Result<Storage> {
        match &self.data_dir {
            Some(dir) => {
                let path = session_db_path(dir, name);
                Storage::open(path).map_err(ServerError::from)
            }
            None => Storage::open_in_memory().map_err(ServerError::from),
        }
    }

    /// Evict every resident session whose last touch is older than the
    /// configured TTL. Intended to run on a periodic background tick.
    pub async fn evict_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired: Vec<String> = inner
            .cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.touched_at) >= self.ttl)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            inner.cache.pop(name);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "evicted idle session actors");
        }
        expired.len()
    }

    pub async fn remove(&self, name: &str) {
        self.inner.write().await.cache.pop(name);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.cache.is_empty()
    }
}

fn session_db_path(dir: &Path, name: &str) -> std::path::PathBuf {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}.sqlite3"))
}
