use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Backend, BackendError, ChunkStream, InvokeRequest};

/// Dispatches each invocation to the backend registered for the model's
/// provider. Provider names match case-insensitively.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` for `provider`, replacing any earlier registration
    pub fn register(mut self, provider: impl AsRef<str>, backend: Arc<dyn Backend>) -> Self {
        self.backends
            .insert(provider.as_ref().to_lowercase(), backend);
        self
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.providers())
            .finish()
    }
}

#[async_trait]
impl Backend for ProviderRouter {
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, BackendError> {
        let key = request.model.provider.to_lowercase();
        let backend = self.backends.get(&key).ok_or_else(|| {
            BackendError::new(&request.model.provider, "no backend registered for provider")
        })?;
        debug!(provider = %key, model = %request.model.name, "routing invocation");
        backend.invoke(request, cancel).await
    }
}
