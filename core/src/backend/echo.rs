use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendError, ChunkStream, InvokeRequest};

/// Streams the user message back, one word per chunk.
///
/// Registered as the `echo` provider by the CLI for dry runs of a script.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    side_context_label: String,
}

impl EchoBackend {
    pub fn new(side_context_label: impl Into<String>) -> Self {
        Self {
            side_context_label: side_context_label.into(),
        }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new("Context")
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, BackendError> {
        let message = request.user_message(&self.side_context_label);
        let chunks: Vec<String> = message.split_inclusive(' ').map(str::to_string).collect();

        // Stops between chunks once cancelled
        let stream = stream::iter(chunks)
            .take_until(cancel.cancelled_owned())
            .map(Ok);
        Ok(stream.boxed())
    }
}
