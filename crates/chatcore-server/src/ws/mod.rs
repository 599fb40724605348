//! WebSocket transport (spec §4.3 framing + AMBIENT STACK transport wiring).
//!
//! Rather than authenticating via the first application-level message (the
//! usual workaround when browsers cannot set custom headers on a WebSocket
//! upgrade), this crate checks the bearer token on the HTTP upgrade request
//! itself — a plain header check is the more literal reading of "a single
//! bearer check at the transport boundary", and nothing here depends on
//! being reachable directly from browser JavaScript.

mod connection;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};

use crate::auth;
use crate::state::AppState;

pub use chatcore_session::ConnectionId;

/// `GET /ws/{session}` — upgrade to a WebSocket bound to one named session.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Err(err) = auth::check_bearer(state.config.auth_token.as_deref(), header) {
        tracing::warn!(%err, session = %session, "websocket upgrade rejected");
        return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
    }

    let idle_timeout = state.config.idle_timeout;
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, session, idle_timeout))
}
