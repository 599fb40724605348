//! Example binary wiring a [`chatcore_server::Server`] to a trivial
//! echo `ModelDriver`, so the crate can be run standalone for manual
//! exercise of the WebSocket protocol. A real deployment supplies its own
//! `ModelDriver` talking to an actual model; this one only proves the wire
//! works end to end. The usual split applies: `thiserror` in the library
//! crates, `anyhow` at this binary entry point.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chatcore_chunks::StreamChunk;
use chatcore_server::{Server, ServerConfig};
use chatcore_session::{ChunkStream, ModelDriver};
use chatcore_types::Message;

/// Replies to every chat request with a single fixed sentence, ignoring the
/// actual message history. Stands in for a real model client.
struct EchoDriver;

#[async_trait]
impl ModelDriver for EchoDriver {
    async fn invoke(&self, _messages: &[Message], _extra_body: &Map<String, Value>, _cancel: CancellationToken) -> ChunkStream {
        let chunks = vec![
            StreamChunk::TextStart,
            StreamChunk::TextDelta {
                delta: "this is a demo echo response".into(),
            },
            StreamChunk::TextEnd,
        ];
        Box::pin(stream::iter(chunks.into_iter().map(Ok)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatcore_server=info,chatcore_session=info")))
        .init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CHATCORE_BIND_ADDRESS") {
        config = config.with_bind_address(addr.parse()?);
    }
    if let Ok(token) = std::env::var("CHATCORE_AUTH_TOKEN") {
        config.auth_token = Some(token);
    }
    if let Ok(dir) = std::env::var("CHATCORE_DATA_DIR") {
        config = config.with_data_dir(dir);
    }

    let server = Server::new(config, Arc::new(EchoDriver));
    server.run().await?;
    Ok(())
}
