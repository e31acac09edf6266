use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use relay_common::GlobalConfigPatch;
use relay_core::{Account, Pricing, TransferConfig};
use relay_provider_core::ProviderConfig;

/// Contents of the `--config` JSON file. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub(crate) global: GlobalConfigPatch,
    pub(crate) providers: Vec<ProviderConfig>,
    pub(crate) pricing: Pricing,
    /// Seed for the in-memory account store.
    pub(crate) accounts: Vec<Account>,
    pub(crate) moderation: ModerationConfig,
    pub(crate) transfer: TransferConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct ModerationConfig {
    pub(crate) blocklist: Vec<String>,
    /// Number of verdicts kept in the memo before the oldest is evicted.
    pub(crate) capacity: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            blocklist: Vec::new(),
            capacity: 4096,
        }
    }
}

impl FileConfig {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: FileConfig = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for provider in &config.providers {
            anyhow::ensure!(
                seen.insert(provider.name.as_str()),
                "provider {} is declared twice",
                provider.name
            );
        }
        Ok(config)
    }
}
