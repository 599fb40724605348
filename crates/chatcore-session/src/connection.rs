//! The Connection Set (spec §4.3): session-owned registry of attached
//! connections and the broadcast fan-out over them. Built around a plain
//! connection-id newtype and an unbounded per-connection outbound channel,
//! generalized from "one websocket" to "any transport that can receive a
//! [`ServerFrame`]".
//!
//! `chatcore-server` owns the actual axum socket; it only ever touches this
//! module through `register`/`unregister` and the `UnboundedSender` handed
//! back by `register`.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::frame::ServerFrame;

/// Identifies one attached transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry {
    sender: mpsc::UnboundedSender<ServerFrame>,
    /// Suppresses `broadcast` delivery while a connection is between
    /// `stream-resuming` and its `resume-ack` (spec §4.4.6 skip rule): live
    /// chunks generated in that window must appear only in replay, not be
    /// delivered twice. `send_to` bypasses this, since replay itself is
    /// always a targeted send.
    suspended: bool,
}

/// Registry of connections attached to one session, and the fan-out used to
/// broadcast frames to all of them. Mutated only by the session's own actor
/// task, so it carries no internal locking (spec §5).
#[derive(Default)]
pub struct ConnectionSet {
    connections: HashMap<ConnectionId, Entry>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection, returning its id and the sender half the
    /// transport should forward into the socket.
    pub fn register(&mut self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Entry {
                sender: tx,
                suspended: false,
            },
        );
        (id, rx)
    }

    pub fn unregister(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send a frame to every attached, non-suspended connection, dropping
    /// any whose receiver has gone away (the transport will unregister them
    /// once it notices the socket closed; a stale sender here is harmless).
    pub fn broadcast(&mut self, frame: ServerFrame) {
        self.connections.retain(|_, entry| {
            if entry.suspended {
                return true;
            }
            entry.sender.send(frame.clone()).is_ok()
        });
    }

    /// Send a frame to one connection only (used for `stream-resuming` and
    /// targeted replay, spec §4.4.6). Delivered even while suspended.
    pub fn send_to(&mut self, id: ConnectionId, frame: ServerFrame) {
        if let Some(entry) = self.connections.get(&id) {
            if entry.sender.send(frame).is_err() {
                self.connections.remove(&id);
            }
        }
    }

    /// Suppress broadcast delivery to `id` until [`Self::resume`] (spec
    /// §4.4.6 skip rule).
    pub fn suspend(&mut self, id: ConnectionId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.suspended = true;
        }
    }

    /// Re-enable broadcast delivery to `id`.
    pub fn resume(&mut self, id: ConnectionId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.suspended = false;
        }
    }
}
