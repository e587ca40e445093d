use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use airelay_common::RelayConfigPatch;
use airelay_core::{RelayEngine, UpstreamClient, WreqUpstreamClient};
use airelay_provider::ProviderRegistry;
use airelay_storage::{LogStorage, RequestLogQueue, RequestLogQueueConfig};

mod cli;
mod settings;

const DEFAULT_DSN: &str = "sqlite://airelay.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::CliArgs::parse();
    let file = settings::load(&args.settings)?;

    // Merge order: CLI > ENV > settings file (clap already applies CLI > ENV
    // per field), then defaults.
    let mut merged = file.relay;
    merged.overlay(RelayConfigPatch {
        host: args.host,
        port: args.port,
        dsn: args.dsn,
        proxy: args.proxy,
        failure_threshold: args.failure_threshold,
        retry_wait_seconds: args.retry_wait_seconds,
        blacklist_seconds: args.blacklist_seconds,
        mode: args
            .mode
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("parse --mode")?,
    });
    if merged.dsn.is_none() {
        merged.dsn = Some(DEFAULT_DSN.to_string());
    }
    let config = merged.into_config().context("finalize relay config")?;

    let storage = LogStorage::connect(&config.dsn)
        .await
        .context("connect storage")?;
    storage.sync().await.context("schema sync")?;
    let queue = RequestLogQueue::spawn(storage, RequestLogQueueConfig::default());

    let registry = Arc::new(ProviderRegistry::new(file.providers));
    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(config.proxy.as_deref()).context("build upstream client")?,
    );
    let engine = Arc::new(RelayEngine::new(
        config.clone(),
        registry,
        client,
        queue.sender(),
    ));

    let app = airelay_router::relay_router(engine);
    let bind = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind, mode = config.mode.as_str());
    axum::serve(listener, app).await?;
    Ok(())
}
