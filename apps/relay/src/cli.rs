use std::path::PathBuf;

use clap::Parser;
use relay_common::GlobalConfigPatch;

#[derive(Debug, Parser)]
#[command(name = "relay", version, about = "OpenAI-compatible LLM gateway")]
pub(crate) struct Cli {
    /// JSON config file with providers, pricing, accounts and moderation settings.
    #[arg(long, env = "RELAY_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, env = "RELAY_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "RELAY_PORT")]
    pub(crate) port: Option<u16>,
    /// Directory holding `<provider>.txt` credential files.
    #[arg(long, env = "RELAY_SECRET_DIR")]
    pub(crate) secret_dir: Option<String>,
    /// Outbound HTTP/SOCKS proxy for upstream calls.
    #[arg(long, env = "RELAY_PROXY")]
    pub(crate) proxy: Option<String>,
    #[arg(long, env = "RELAY_TRANSFER_TIMEOUT_SECS")]
    pub(crate) transfer_timeout_secs: Option<u64>,
    #[arg(long, env = "RELAY_WEBHOOK_URL")]
    pub(crate) webhook_url: Option<String>,
}

impl Cli {
    /// Flags and env vars as an overlay for the config file's `global` section.
    pub(crate) fn global_patch(&self) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            proxy: self.proxy.clone(),
            secret_dir: self.secret_dir.clone(),
            connect_timeout_ms: None,
            transfer_timeout_secs: self.transfer_timeout_secs,
            webhook_url: self.webhook_url.clone(),
        }
    }
}
