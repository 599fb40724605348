//! Per-session cache of processed tool ids and client-submitted tool
//! outputs (spec §9 DESIGN NOTES, "Global-ish state"): kept per-session
//! rather than in a process-wide map, and pruned against the set of
//! `toolCallId`s that still exist in persisted messages so it cannot grow
//! without bound across a long-lived conversation.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// Tracks which `toolCallId`s this session has already applied a terminal
/// `tool-result`/`tool-approval` for, plus the most recent output a client
/// reported for a call that hadn't yet landed in the Message Store (the race
/// `handle_tool_result`'s bounded retry exists to close, spec §4.4.3).
#[derive(Default)]
pub struct ToolCache {
    processed: HashSet<String>,
    pending_client_outputs: HashMap<String, Value>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_processed(&mut self, tool_call_id: &str) {
        self.processed.insert(tool_call_id.to_string());
    }

    pub fn is_processed(&self, tool_call_id: &str) -> bool {
        self.processed.contains(tool_call_id)
    }

    pub fn record_pending_output(&mut self, tool_call_id: &str, output: Value) {
        self.pending_client_outputs
            .insert(tool_call_id.to_string(), output);
    }

    pub fn take_pending_output(&mut self, tool_call_id: &str) -> Option<Value> {
        self.pending_client_outputs.remove(tool_call_id)
    }

    /// Drop any cached entry whose `toolCallId` no longer exists in any
    /// persisted message (spec §9: "clean up entries... to bound growth").
    pub fn retain_known(&mut self, known_tool_call_ids: &HashSet<String>) {
        self.processed.retain(|id| known_tool_call_ids.contains(id));
        self.pending_client_outputs
            .retain(|id, _| known_tool_call_ids.contains(id));
    }

    /// Drop everything, called alongside `chat-clear` (spec §4.4.8).
    pub fn clear(&mut self) {
        self.processed.clear();
        self.pending_client_outputs.clear();
    }
}
