use serde::{Deserialize, Serialize};

use crate::provider::Capabilities;

/// Declarative description of one upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub organic: bool,
    /// Organic provider that also serves `/moderations`.
    #[serde(default)]
    pub moderations: bool,
    #[serde(default)]
    pub models: Vec<String>,
    /// Extra headers sent with every request to this provider.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl ProviderConfig {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: self.streaming,
            organic: self.organic,
            moderations: self.moderations,
        }
    }
}
