use std::collections::BTreeSet;
use std::sync::Arc;

use crate::UpstreamProvider;

/// Ordered provider set. Order is registration order, which keeps
/// index-based choosers deterministic in tests.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn UpstreamProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing an earlier one with the same name.
    pub fn register(&mut self, provider: Arc<dyn UpstreamProvider>) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|p| p.name() == provider.name())
        {
            *slot = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UpstreamProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UpstreamProvider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Sorted union of every chat model any provider serves.
    pub fn models(&self) -> Vec<(String, String)> {
        let mut seen = BTreeSet::new();
        for provider in &self.providers {
            for model in provider.models() {
                seen.insert((model.clone(), provider.name().to_string()));
            }
        }
        let mut out: Vec<(String, String)> = Vec::new();
        for (model, owner) in seen {
            if out.last().is_some_and(|(last, _)| *last == model) {
                continue;
            }
            out.push((model, owner));
        }
        out
    }
}
