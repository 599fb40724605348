//! Session-level tunables: plain fields with a `Default` impl and `with_*`
//! builder methods, not environment globals, so tests can configure a
//! session independently of any other.

use std::time::Duration;

use chatcore_streamlog::StreamLogConfig;

/// Tunables for one [`crate::controller::Session`] (spec §5, §9).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Buffering/retention knobs handed straight to the Resumable Stream Log.
    pub stream_log: StreamLogConfig,
    /// Number of retry attempts when a `tool-result`/`tool-approval` frame
    /// targets a `toolCallId` not yet found in the last assistant message
    /// (spec §4.4.3, §5: "10 attempts, ~100 ms apart").
    pub tool_lookup_retries: u32,
    /// Delay between tool-lookup retry attempts.
    pub tool_lookup_retry_delay: Duration,
    /// Short delay a continuation waits before starting when no stream is
    /// currently active, to let any in-flight broadcast settle (spec §4.4.4).
    pub continuation_settle_delay: Duration,
    /// Ephemeral provider-metadata keys stripped during sanitization
    /// (spec §4.4.7).
    pub ephemeral_keys: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_log: StreamLogConfig::default(),
            tool_lookup_retries: 10,
            tool_lookup_retry_delay: Duration::from_millis(100),
            continuation_settle_delay: Duration::from_millis(50),
            ephemeral_keys: chatcore_types::DEFAULT_EPHEMERAL_KEYS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn with_stream_log(mut self, config: StreamLogConfig) -> Self {
        self.stream_log = config;
        self
    }

    pub fn with_tool_lookup_retries(mut self, retries: u32) -> Self {
        self.tool_lookup_retries = retries;
        self
    }

    pub fn with_tool_lookup_retry_delay(mut self, delay: Duration) -> Self {
        self.tool_lookup_retry_delay = delay;
        self
    }

    pub fn with_continuation_settle_delay(mut self, delay: Duration) -> Self {
        self.continuation_settle_delay = delay;
        self
    }

    pub fn ephemeral_keys(&self) -> Vec<&str> {
        self.ephemeral_keys.iter().map(String::as_str).collect()
    }
}
