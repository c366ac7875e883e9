//! Backend invocation contract
//!
//! The executor talks to model providers only through [`Backend`]: one call
//! per operator invocation, answered with a stream of text chunks. Concrete
//! provider clients live outside this crate and implement the trait.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::ModelId;

mod echo;
mod router;

pub use echo::EchoBackend;
pub use router::ProviderRouter;

/// Text chunks in generation order
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backend '{provider}' failed: {cause}")]
pub struct BackendError {
    pub provider: String,
    pub cause: String,
}

impl BackendError {
    pub fn new(provider: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            cause: cause.into(),
        }
    }
}

/// One `(model, prompt, input)` invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub model: ModelId,
    /// System prompt, from the call's Prompt variable
    pub system_prompt: Option<String>,
    /// The pipeline's current buffer
    pub user_content: String,
    /// Extra input supplied alongside the pipeline input
    pub side_context: Option<String>,
}

impl InvokeRequest {
    pub fn new(model: ModelId, user_content: impl Into<String>) -> Self {
        Self {
            model,
            system_prompt: None,
            user_content: user_content.into(),
            side_context: None,
        }
    }

    /// Fold the side context into a single user message, for providers that
    /// take one user turn. The side context follows the pipeline input as a
    /// separate section headed by `label` (no heading when `label` is empty).
    pub fn user_message(&self, label: &str) -> String {
        match &self.side_context {
            None => self.user_content.clone(),
            Some(side) if label.is_empty() => format!("{}\n\n{}", self.user_content, side),
            Some(side) => format!("{}\n\n{}:\n{}", self.user_content, label, side),
        }
    }
}

/// A provider able to run a model invocation.
///
/// Implementations must stop producing chunks and release their connection
/// promptly once `cancel` fires. Retries, if any, are the implementation's
/// own policy; the executor never retries.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, BackendError>;
}
