use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{ProviderError, ProviderResult, RequestEnvelope, TargetRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Speaks server-sent events upstream.
    pub streaming: bool,
    /// Accepts requests in the target protocol as-is (non-chat paths).
    pub organic: bool,
    /// Organic provider that also serves `/moderations`.
    pub moderations: bool,
}

#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn models(&self) -> &[String];

    fn supports_model(&self, model: &str) -> bool {
        self.models().iter().any(|m| m == model)
    }

    /// Whether the provider can currently build a target (e.g. has live credentials).
    async fn is_available(&self) -> bool {
        true
    }

    async fn chat_completion(&self, _payload: &JsonValue) -> ProviderResult<TargetRequest> {
        Err(ProviderError::Unsupported("chat_completion"))
    }

    async fn organify(&self, _request: &RequestEnvelope) -> ProviderResult<TargetRequest> {
        Err(ProviderError::Unsupported("organify"))
    }
}
