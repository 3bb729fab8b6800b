use anyhow::Context;
use clash_fetcher::{ClashApiClient, FetcherConfig, UpdatePipeline};
use season_engine::{PgStore, SeasonStore};
use std::sync::Arc;
use tracing::{error, info};

/// Run one ingest + score batch and print its report as JSON
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("🔄 Running one clan update");

    let config = FetcherConfig::from_env().context("Failed to load configuration")?;
    let store = PgStore::connect(&config.engine.database)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let client = ClashApiClient::new(&config.api).context("Failed to create API client")?;
    let pipeline = UpdatePipeline::from_config(&config, Arc::new(store), Arc::new(client))?;

    match pipeline.run_update().await {
        Ok(report) => {
            info!(
                "✅ Update completed: {} players, {} scored",
                report.ingestion.players_updated, report.scoring.players_scored
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!("❌ Update failed: {}", e);
            Err(e.into())
        }
    }
}
