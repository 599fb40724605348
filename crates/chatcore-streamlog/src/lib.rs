//! The Resumable Stream Log: durable chunk replay for reconnecting or
//! newly-arriving clients.

pub mod log;

pub use log::{RestoreOutcome, StreamLog, StreamLogConfig};
