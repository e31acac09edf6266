use std::sync::Arc;

use rand::Rng;

use relay_provider_core::{
    ProviderError, ProviderRegistry, RequestEnvelope, TargetRequest, UpstreamProvider,
};

/// Picks one index out of `len` candidates. `len` is never zero.
pub trait Chooser: Send + Sync {
    fn choose(&self, len: usize) -> usize;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UniformChooser;

impl Chooser for UniformChooser {
    fn choose(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

#[derive(Debug, Clone)]
pub enum SelectError {
    /// The filtered set was empty. Terminal.
    NoProviderAvailable { model: Option<String> },
    /// The chosen provider could not build a target. Counts as a failed attempt.
    Provider {
        provider: String,
        error: ProviderError,
    },
}

/// Capability filter plus random choice over the registry.
pub struct ProviderSelector {
    registry: Arc<ProviderRegistry>,
    chooser: Arc<dyn Chooser>,
}

impl ProviderSelector {
    pub fn new(registry: Arc<ProviderRegistry>, chooser: Arc<dyn Chooser>) -> Self {
        Self { registry, chooser }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Providers that may serve `request`, in registration order.
    pub async fn eligible(&self, request: &RequestEnvelope) -> Vec<Arc<dyn UpstreamProvider>> {
        let mut out = Vec::new();
        for provider in self.registry.iter() {
            if !matches_shape(provider.as_ref(), request) {
                continue;
            }
            if !provider.is_available().await {
                continue;
            }
            out.push(provider.clone());
        }
        out
    }

    pub async fn select(&self, request: &RequestEnvelope) -> Result<TargetRequest, SelectError> {
        let candidates = self.eligible(request).await;
        if candidates.is_empty() {
            return Err(SelectError::NoProviderAvailable {
                model: request.model.clone(),
            });
        }
        let idx = self.chooser.choose(candidates.len()).min(candidates.len() - 1);
        let provider = &candidates[idx];
        let result = if request.is_chat() {
            provider.chat_completion(&request.payload).await
        } else {
            provider.organify(request).await
        };
        result.map_err(|error| SelectError::Provider {
            provider: provider.name().to_string(),
            error,
        })
    }
}

fn matches_shape(provider: &dyn UpstreamProvider, request: &RequestEnvelope) -> bool {
    let caps = provider.capabilities();
    if request.is_chat() {
        if request.stream && !caps.streaming {
            return false;
        }
        return request
            .model
            .as_deref()
            .is_some_and(|model| provider.supports_model(model));
    }
    if !caps.organic {
        return false;
    }
    !request.is_moderation() || caps.moderations
}
