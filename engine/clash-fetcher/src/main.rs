use anyhow::Context;
use clash_fetcher::{ClashApiClient, FetcherConfig, FetcherScheduler, UpdatePipeline};
use season_engine::{PgStore, SeasonStore};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting Clash Fetcher Service");

    let config = FetcherConfig::from_env().context("Failed to load configuration")?;
    info!("Loaded configuration for clan #{}", config.api.clan_tag);

    let store = PgStore::connect(&config.engine.database)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("✅ Connected to database");

    let client = ClashApiClient::new(&config.api).context("Failed to create API client")?;
    let pipeline = UpdatePipeline::from_config(&config, Arc::new(store), Arc::new(client))?;
    let scheduler = FetcherScheduler::new(config.scheduler.clone(), Arc::new(pipeline));

    tokio::select! {
        _ = scheduler.start() => {}
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    info!("Clash Fetcher stopped");
    Ok(())
}
