use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid global config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Directory holding `<provider>.txt` and `<provider>.invalid.txt` credential files.
    pub secret_dir: String,
    /// Connect timeout for upstream calls. Kept short so dead providers fail fast.
    pub connect_timeout_ms: u64,
    /// Total timeout for one upstream call, including a streamed body.
    pub transfer_timeout_secs: u64,
    /// Operator webhook receiving credential / exhaustion notices.
    pub webhook_url: Option<String>,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub proxy: Option<String>,
    pub secret_dir: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub transfer_timeout_secs: Option<u64>,
    pub webhook_url: Option<String>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.secret_dir.is_some() {
            self.secret_dir = other.secret_dir;
        }
        if other.connect_timeout_ms.is_some() {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
        if other.transfer_timeout_secs.is_some() {
            self.transfer_timeout_secs = other.transfer_timeout_secs;
        }
        if other.webhook_url.is_some() {
            self.webhook_url = other.webhook_url;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let transfer_timeout_secs = self.transfer_timeout_secs.unwrap_or(120);
        if transfer_timeout_secs == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "transfer_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        let secret_dir = self
            .secret_dir
            .filter(|dir| !dir.trim().is_empty())
            .ok_or(GlobalConfigError::MissingField("secret_dir"))?;
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(2332),
            proxy: normalize(self.proxy),
            secret_dir,
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(2_000),
            transfer_timeout_secs,
            webhook_url: normalize(self.webhook_url),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            proxy: value.proxy,
            secret_dir: Some(value.secret_dir),
            connect_timeout_ms: Some(value.connect_timeout_ms),
            transfer_timeout_secs: Some(value.transfer_timeout_secs),
            webhook_url: value.webhook_url,
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}
