//! axum WebSocket transport for the resumable chat-streaming core (spec §4.3
//! Connection Set + AMBIENT STACK): a `Server` wrapping `AppState`, a
//! `router()` assembling health + `/ws/{session}` routes behind
//! `TraceLayer`, and `run`/`run_on` binding a `TcpListener` and calling
//! `axum::serve`.
//!
//! Everything protocol-specific (reconciliation, streaming, persistence)
//! lives in `chatcore-session`; this crate is purely the wire: HTTP upgrade,
//! idle timeout, bearer auth, and the bounded registry of session actors a
//! long-lived process needs to avoid growing without bound.

pub mod auth;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;
mod ws;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use registry::SessionRegistry;
pub use state::AppState;
pub use ws::ConnectionId;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use chatcore_session::ModelDriver;

/// How often the background sweep checks for idle session actors to evict.
const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The chat-streaming server: an axum app plus a periodic sweep of the
/// session registry.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, model: Arc<dyn ModelDriver>) -> Self {
        Self {
            state: AppState::new(config, model),
        }
    }

    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router: an unauthenticated health check plus the
    /// authenticated `/ws/{session}` upgrade route.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/ws/{session}", get(ws::ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server, binding to `config.bind_address`.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (used by tests).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let sweep_registry = self.state.registry.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                let evicted = sweep_registry.evict_expired().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "swept idle session actors");
                }
            }
        });

        let router = self.router();
        info!(%addr, "starting chatcore server");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Internal(format!("failed to bind {addr}: {err}")))?;

        axum::serve(listener, router)
            .await
            .map_err(|err| ServerError::Internal(format!("server error: {err}")))?;

        Ok(())
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

async fn health() -> &'static str {
    "ok"
}
