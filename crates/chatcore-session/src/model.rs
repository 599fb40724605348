//! Abstraction over the generative model invocation the Session Controller
//! drives (spec §4.4.1 step 5: "Drive the model"). The model itself is out
//! of scope; this crate only needs something that, given the merged
//! message history and the opaque request body, yields a stream of
//! [`StreamChunk`]s and can be cooperatively cancelled.

use async_trait::async_trait;
use chatcore_chunks::StreamChunk;
use chatcore_types::Message;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ModelError(pub String);

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ModelError>>;

/// One model invocation. Implementations own whatever client/transport
/// talks to the actual model; the controller only ever calls `invoke`.
#[async_trait]
pub trait ModelDriver: Send + Sync {
    /// Start a model turn over `messages` (already merged with stored
    /// history) and the request's opaque extra body fields. `cancel` is
    /// observed cooperatively: once triggered, the driver should wind down
    /// and end its stream, but chunks already queued are still yielded
    /// (spec §5 cancellation semantics).
    async fn invoke(
        &self,
        messages: &[Message],
        extra_body: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> ChunkStream;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    /// A driver that replays a fixed chunk script, ignoring input and
    /// cancellation. Useful for controller tests that only care about chunk
    /// application, persistence, and broadcast ordering.
    pub struct ScriptedDriver {
        pub chunks: Vec<StreamChunk>,
    }

    #[async_trait]
    impl ModelDriver for ScriptedDriver {
        async fn invoke(
            &self,
            _messages: &[Message],
            _extra_body: &Map<String, Value>,
            _cancel: CancellationToken,
        ) -> ChunkStream {
            let chunks = self.chunks.clone();
            Box::pin(stream::iter(chunks.into_iter().map(Ok)))
        }
    }

    /// A driver that yields one chunk per `delay` tick, checking `cancel`
    /// before each one, so tests can exercise cooperative mid-stream
    /// cancellation (spec §4.4.2) rather than only cancellation before or
    /// after a turn.
    pub struct SlowCancellableDriver {
        pub chunks: Vec<StreamChunk>,
        pub delay: Duration,
    }

    #[async_trait]
    impl ModelDriver for SlowCancellableDriver {
        async fn invoke(
            &self,
            _messages: &[Message],
            _extra_body: &Map<String, Value>,
            cancel: CancellationToken,
        ) -> ChunkStream {
            let delay = self.delay;
            let state = (self.chunks.clone().into_iter(), cancel);
            Box::pin(stream::unfold(state, move |(mut iter, cancel)| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                tokio::time::sleep(delay).await;
                let next = iter.next()?;
                Some((Ok(next), (iter, cancel)))
            }))
        }
    }
}
