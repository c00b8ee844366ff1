//! Spotline: rate-limited video ad server.
//!
//! Main entry point that loads configuration, opens the store and starts the server.

use anyhow::Context;
use clap::Parser;
use spotline_api::ApiServer;
use spotline_core::config::{AppConfig, StoreBackend};
use spotline_core::Ad;
use spotline_delivery::DeliveryEngine;
use spotline_store::{AnyStore, CampaignStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "spotline")]
#[command(about = "Video ad server with a per-client rolling delivery cap")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "SPOTLINE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "SPOTLINE__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "SPOTLINE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// SQLite database URL (overrides config)
    #[arg(long, env = "SPOTLINE__STORE__DATABASE_URL")]
    database_url: Option<String>,

    /// Keep everything in memory (nothing survives a restart)
    #[arg(long, default_value_t = false)]
    memory: bool,

    /// JSON array of creatives to add to the available pool on startup
    #[arg(long)]
    seed_file: Option<String>,
}

async fn seed_pool(store: &AnyStore, path: &str) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {path}"))?;
    let ads: Vec<Ad> = serde_json::from_str(&raw).with_context(|| format!("parsing seed file {path}"))?;
    let offered = ads.len();
    let inserted = store.seed_available_ads(ads).await?;
    info!(path, offered, inserted, "Creative pool seeded");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotline=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Spotline starting up");

    // Load configuration. An explicit file must load; env-only falls back to defaults.
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from(Some(path)).with_context(|| format!("loading config {path}"))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(url) = cli.database_url {
        config.store.backend = StoreBackend::Sqlite;
        config.store.database_url = url;
    }
    if cli.memory {
        config.store.backend = StoreBackend::Memory;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        backend = ?config.store.backend,
        hourly_cap_secs = config.delivery.hourly_cap_secs,
        window_secs = config.delivery.window_secs,
        "Configuration loaded"
    );

    let store = Arc::new(AnyStore::open(&config.store, config.delivery.clone()).await?);

    if let Some(path) = cli.seed_file.as_deref() {
        seed_pool(&store, path).await?;
    }

    let engine = Arc::new(DeliveryEngine::new(
        store.clone(),
        store.clone(),
        config.delivery.clone(),
    ));

    let api_server = ApiServer::new(config.clone(), store.clone(), engine);

    // Start metrics exporter
    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("Spotline is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http(shutdown_signal()).await?;

    if let AnyStore::Sqlite(sqlite) = store.as_ref() {
        sqlite.close().await;
    }

    info!("Spotline stopped");
    Ok(())
}
