use std::sync::Arc;

use relay_provider_core::{CredentialPool, ProviderConfig, ProviderRegistry};

use crate::OpenAICompatibleProvider;

/// Builds the registry from declarative provider configs, all sharing one pool.
pub fn build_registry(configs: &[ProviderConfig], pool: Arc<CredentialPool>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for config in configs {
        tracing::debug!(
            event = "provider_registered",
            provider = %config.name,
            models = config.models.len(),
            streaming = config.streaming,
            organic = config.organic,
        );
        registry.register(Arc::new(OpenAICompatibleProvider::new(
            config.clone(),
            pool.clone(),
        )));
    }
    registry
}
