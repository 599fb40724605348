//! Server-level tunables: plain fields with a `Default` impl and `with_*`
//! builder methods.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chatcore_session::SessionConfig;

/// Idle-timeout for a WebSocket connection with no traffic.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Server-wide configuration: bind address, auth, and the bounds on how many
/// concurrent session actors this process keeps resident.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_address: SocketAddr,
    /// Bearer token required on the `authenticate` frame (spec Non-goals:
    /// "authentication beyond a single bearer check at the transport
    /// boundary"). `None` disables the check entirely (local/dev mode, no
    /// auth token configured).
    pub auth_token: Option<String>,
    /// How long a connection may sit idle before the transport closes it.
    pub idle_timeout: Duration,
    /// Maximum number of session actors kept resident at once; least
    /// recently touched sessions beyond this bound are evicted first.
    pub max_resident_sessions: usize,
    /// A session actor with no registered connections and no activity for
    /// this long is evicted even if under the capacity bound.
    pub session_ttl: Duration,
    /// Config handed to every spawned [`SessionConfig`].
    pub session: SessionConfig,
    /// Directory each session's SQLite file lives under (`<name>.sqlite3`).
    /// `None` keeps every session's storage in memory only, which is fine
    /// for tests and for demos but loses all data across a process restart.
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".parse().expect("valid default address"),
            auth_token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_resident_sessions: 256,
            session_ttl: Duration::from_secs(30 * 60),
            session: SessionConfig::default(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Create a config with the given auth token (`None` disables auth,
    /// i.e. localhost/dev mode).
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            ..Self::default()
        }
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_resident_sessions(mut self, max: usize) -> Self {
        self.max_resident_sessions = max;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }
}
