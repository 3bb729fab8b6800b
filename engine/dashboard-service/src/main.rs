//! Clan Dashboard Service
//!
//! Entry point: loads configuration, connects to Postgres, starts the
//! background update scheduler and serves the REST API until shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use clash_fetcher::{ClashApiClient, FetcherScheduler, UpdatePipeline};
use dashboard_service::{
    create_routes, initialize_logging, initialize_logging_with_config, load_config,
    setup_signal_handlers, DashboardService,
};
use season_engine::{PgStore, SeasonStore};

#[derive(Debug, Parser)]
#[command(name = "clan-dashboard", version, about = "Clan dashboard scoring service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve the API without running periodic updates
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            initialize_logging()?;
            error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    initialize_logging_with_config(&config.logging)?;

    info!("Starting Clan Dashboard Service v{}", env!("CARGO_PKG_VERSION"));

    let store = PgStore::connect(&config.fetcher.engine.database)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("✅ Connected to database");

    let store: Arc<dyn SeasonStore> = Arc::new(store);
    let client = ClashApiClient::new(&config.fetcher.api).context("Failed to create API client")?;
    let pipeline = Arc::new(UpdatePipeline::from_config(&config.fetcher, Arc::clone(&store), Arc::new(client))?);

    let scheduler_handle = if config.fetcher.scheduler.enabled && !args.no_scheduler {
        let scheduler = FetcherScheduler::new(config.fetcher.scheduler.clone(), Arc::clone(&pipeline));
        Some(tokio::spawn(async move { scheduler.start().await }))
    } else {
        info!("Periodic updates disabled");
        None
    };

    let service = Arc::new(DashboardService::new(store, pipeline));
    let routes = create_routes(service);
    let addr = config.server.socket_addr()?;

    let shutdown_signal = setup_signal_handlers()?;
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_signal.await;
            info!("Shutdown signal received");
        })
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Clan Dashboard listening on http://{}", bound);
    server.await;

    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    info!("Clan Dashboard Service shutdown complete");
    Ok(())
}
