use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

mod cli;
mod config;

use relay_core::{
    Admission, Core, KeywordClassifier, LedgerSettlement, MemoryAccountStore, ModerationGate,
    ProviderSelector, TransferEngine, UniformChooser, UpstreamClientConfig, UsageStats,
    WebhookEventSink, WreqUpstreamClient,
};
use relay_provider_core::{
    CredentialHealth, CredentialPool, EventHub, FileCredentialStore, TerminalEventSink,
};
use relay_provider_impl::build_registry;

use crate::cli::Cli;
use crate::config::FileConfig;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("relay failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => FileConfig::load(path).await?,
        None => FileConfig::default(),
    };
    let mut patch = file.global.clone();
    patch.overlay(cli.global_patch());
    let global = patch.into_config().context("invalid global config")?;
    info!(
        event = "config_loaded",
        host = %global.host,
        port = global.port,
        secret_dir = %global.secret_dir,
        proxy = %global.proxy.as_deref().unwrap_or(""),
        providers = file.providers.len(),
        accounts = file.accounts.len(),
    );

    let events = EventHub::default();
    events.add_sink(Arc::new(TerminalEventSink::new())).await;
    if let Some(url) = &global.webhook_url {
        let sink = WebhookEventSink::new(url.clone()).context("failed to build webhook client")?;
        events.add_sink(Arc::new(sink)).await;
    }

    let pool = Arc::new(CredentialPool::new());
    let store = Arc::new(FileCredentialStore::new(global.secret_dir.clone()));
    let health = CredentialHealth::new(pool.clone(), store, events.clone());
    for provider in &file.providers {
        let active = health
            .load_provider(&provider.name)
            .await
            .with_context(|| format!("failed to load credentials for {}", provider.name))?;
        if active == 0 {
            warn!(event = "pool_empty", provider = %provider.name);
        } else {
            info!(event = "pool_ready", provider = %provider.name, credentials = active);
        }
    }

    let registry = Arc::new(build_registry(&file.providers, pool));
    let selector = Arc::new(ProviderSelector::new(
        registry.clone(),
        Arc::new(UniformChooser),
    ));
    let client = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&global))
        .context("failed to build upstream http client")?;

    let accounts = Arc::new(MemoryAccountStore::new(file.accounts));
    let settlement = Arc::new(LedgerSettlement::new(
        accounts.clone(),
        Arc::new(UsageStats::new()),
    ));
    let engine = TransferEngine::new(
        selector,
        Arc::new(client),
        health,
        events,
        settlement,
        file.transfer,
    );
    let moderation = Arc::new(ModerationGate::new(
        Arc::new(KeywordClassifier::new(file.moderation.blocklist)),
        file.moderation.capacity,
    ));
    let admission = Admission::new(accounts, moderation, file.pricing);
    let core = Core::new(admission, engine, registry);

    let bind = format!("{}:{}", global.host, global.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(event = "listening", addr = %bind);
    axum::serve(
        listener,
        core.router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server stopped with an error")?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(event = "signal_listener_failed", error = %err);
        std::future::pending::<()>().await;
    }
    info!(event = "shutdown");
}
