use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

use season_engine::{
    BaselinePolicy, BaselineTracker, ResetFailure, ResetReport, ScoringEngine, ScoringReport,
    SeasonLifecycle, SeasonStore,
};

use crate::client::ClanDataSource;
use crate::config::{FetcherConfig, RetryConfig, SchedulerConfig};
use crate::error::{FetchError, Result};
use crate::ingest::{IngestOptions, IngestionReport, Ingestor};
use crate::models::FetcherEvent;

/// Outcome of one ingest + score batch
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub ingestion: IngestionReport,
    pub scoring: ScoringReport,
}

/// Ordered ingest then score pipeline; at most one batch runs at a time
pub struct UpdatePipeline {
    ingestor: Ingestor,
    engine: Arc<ScoringEngine>,
    lifecycle: Arc<SeasonLifecycle>,
    budget: Duration,
    lock: Mutex<()>,
}

impl UpdatePipeline {
    pub fn new(
        ingestor: Ingestor,
        engine: Arc<ScoringEngine>,
        lifecycle: Arc<SeasonLifecycle>,
        budget: Duration,
    ) -> Self {
        Self { ingestor, engine, lifecycle, budget, lock: Mutex::new(()) }
    }

    /// Wire ingestion, scoring and the season lifecycle over one store
    pub fn from_config(
        config: &FetcherConfig,
        store: Arc<dyn SeasonStore>,
        source: Arc<dyn ClanDataSource>,
    ) -> Result<Self> {
        let scoring = &config.engine.scoring;
        let rules = scoring.load_rules()?;

        let tracker = BaselineTracker::new(Arc::clone(&store), scoring.first_sight_baseline);
        let lifecycle = Arc::new(SeasonLifecycle::new(
            Arc::clone(&store),
            tracker,
            scoring.default_window(),
        ));
        let engine = Arc::new(ScoringEngine::new(Arc::clone(&store), rules)?);
        let ingestor = Ingestor::new(
            source,
            store,
            Arc::clone(&lifecycle),
            config.api.clan_tag.clone(),
            IngestOptions::new(&config.api, scoring.departure_policy),
        );
        Ok(Self::new(ingestor, engine, lifecycle, config.scheduler.batch_budget()))
    }

    pub fn engine(&self) -> &Arc<ScoringEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> &Arc<SeasonLifecycle> {
        &self.lifecycle
    }

    /// Ingest from the game API and recompute scores within the batch budget
    pub async fn run_update(&self) -> Result<UpdateReport> {
        let _guard = self.lock.lock().await;
        timeout(self.budget, async {
            let context = self.lifecycle.current_context(Utc::now()).await?;
            let ingestion = self.ingestor.run(&context).await?;
            let scoring = self.engine.execute(&context).await?;
            Ok::<_, FetchError>(UpdateReport { ingestion, scoring })
        })
        .await
        .map_err(|_| FetchError::BudgetExceeded { seconds: self.budget.as_secs() })?
    }

    /// Recompute scores from stored telemetry only, e.g. after an admin edit
    pub async fn rescore(&self) -> Result<ScoringReport> {
        let _guard = self.lock.lock().await;
        let context = self.lifecycle.current_context(Utc::now()).await?;
        Ok(self.engine.execute(&context).await?)
    }

    /// Archive scores and open a new window once no batch is in flight
    pub async fn reset(
        &self,
        policy: BaselinePolicy,
        label: Option<String>,
    ) -> std::result::Result<ResetReport, ResetFailure> {
        let _guard = self.lock.lock().await;
        self.lifecycle.reset_season(policy, label, Utc::now()).await
    }

    /// Same as [`UpdatePipeline::reset`], also deleting war, CWL, capital and
    /// weekly trophy history
    pub async fn reset_and_purge(
        &self,
        policy: BaselinePolicy,
        label: Option<String>,
    ) -> std::result::Result<ResetReport, ResetFailure> {
        let _guard = self.lock.lock().await;
        self.lifecycle.reset_season_and_purge_history(policy, label, Utc::now()).await
    }
}

/// Periodic driver for the update pipeline
pub struct FetcherScheduler {
    config: SchedulerConfig,
    pipeline: Arc<UpdatePipeline>,
}

impl FetcherScheduler {
    pub fn new(config: SchedulerConfig, pipeline: Arc<UpdatePipeline>) -> Self {
        Self { config, pipeline }
    }

    /// Run updates on the poll interval until the task is dropped
    pub async fn start(&self) {
        if !self.config.enabled {
            info!("Scheduler disabled, no periodic updates will run");
            return;
        }
        info!("Starting clan update scheduler, every {} minutes", self.config.poll_minutes);

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(event) => info!("Scheduled update completed: {:?}", event),
                Err(e) => error!("Scheduled update failed after retries: {}", e),
            }
        }
    }

    /// One update with retry, reported as a fetcher event
    pub async fn run_once(&self) -> Result<FetcherEvent> {
        let pipeline = Arc::clone(&self.pipeline);
        let result = run_with_retry(
            || {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.run_update().await }
            },
            &self.config.retry,
        )
        .await;

        match result {
            Ok(report) => Ok(FetcherEvent::UpdateCompleted {
                players: report.ingestion.players_updated,
                records: report.ingestion.records.written(),
                timestamp: Utc::now(),
            }),
            Err(e) => {
                let event = FetcherEvent::FetchFailed {
                    endpoint: "update".to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                };
                warn!("{:?}", event);
                Err(e)
            }
        }
    }
}

/// Retry `f` with exponential backoff while it fails transiently; fatal errors
/// and the last error once attempts run out are returned as-is
pub async fn run_with_retry<F, Fut, T>(mut f: F, retry_config: &RetryConfig) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(retry_config.initial_delay_secs);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= retry_config.max_retries => return Err(e),
            Err(e) => {
                warn!("Attempt {} failed: {}, retrying in {:?}", attempt, e, delay);
                sleep(delay).await;
                delay = Duration::from_secs(
                    (delay.as_secs() as f64 * retry_config.backoff_multiplier)
                        .min(retry_config.max_delay_secs as f64) as u64,
                );
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig { max_retries, initial_delay_secs: 0, max_delay_secs: 0, backoff_multiplier: 2.0 }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(
            || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(FetchError::Timeout { endpoint: "/clans".to_string() })
                    } else {
                        Ok(attempt)
                    }
                }
            },
            &retry(3),
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Status { endpoint: "/clans".to_string(), status: 503 }) }
            },
            &retry(2),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct DownSource;

    #[async_trait::async_trait]
    impl ClanDataSource for DownSource {
        async fn clan(&self, _: &str) -> Result<crate::models::ClanResponse> {
            Err(FetchError::Status { endpoint: "/clans".to_string(), status: 503 })
        }
        async fn player(&self, _: &str) -> Result<crate::models::PlayerProfile> {
            Err(FetchError::Status { endpoint: "/players".to_string(), status: 503 })
        }
        async fn current_war(&self, _: &str) -> Result<crate::models::CurrentWar> {
            Err(FetchError::Status { endpoint: "/currentwar".to_string(), status: 503 })
        }
        async fn war_log(&self, _: &str) -> Result<crate::models::WarLog> {
            Err(FetchError::Status { endpoint: "/warlog".to_string(), status: 503 })
        }
        async fn capital_raid_seasons(&self, _: &str, _: usize) -> Result<crate::models::CapitalRaidSeasons> {
            Err(FetchError::Status { endpoint: "/capitalraidseasons".to_string(), status: 503 })
        }
        async fn league_group(&self, _: &str) -> Result<crate::models::LeagueGroup> {
            Err(FetchError::Status { endpoint: "/leaguegroup".to_string(), status: 503 })
        }
        async fn league_war(&self, _: &str) -> Result<crate::models::LeagueWar> {
            Err(FetchError::Status { endpoint: "/wars".to_string(), status: 503 })
        }
    }

    fn pipeline() -> Arc<UpdatePipeline> {
        let mut config = FetcherConfig::default();
        config.api.clan_tag = "2PQ8RYL".to_string();
        let store: Arc<dyn SeasonStore> = Arc::new(season_engine::MemoryStore::new());
        Arc::new(UpdatePipeline::from_config(&config, store, Arc::new(DownSource)).unwrap())
    }

    #[tokio::test]
    async fn test_unreachable_roster_fails_the_update() {
        let scheduler = FetcherScheduler::new(
            SchedulerConfig { retry: retry(2), ..FetcherConfig::default().scheduler },
            pipeline(),
        );
        let result = scheduler.run_once().await;
        assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = run_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::EmptyRoster { clan_tag: "2PQ8RYL".to_string() }) }
            },
            &retry(5),
        )
        .await;
        assert!(matches!(result, Err(FetchError::EmptyRoster { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// One-member clan whose roster takes a while to arrive
    struct SlowRosterSource;

    #[async_trait::async_trait]
    impl ClanDataSource for SlowRosterSource {
        async fn clan(&self, clan_tag: &str) -> Result<crate::models::ClanResponse> {
            sleep(Duration::from_millis(300)).await;
            Ok(serde_json::from_value(serde_json::json!({
                "tag": format!("#{clan_tag}"),
                "name": "Clan",
                "memberList": [{"tag": "#A", "name": "alpha"}]
            }))
            .unwrap())
        }
        async fn player(&self, _: &str) -> Result<crate::models::PlayerProfile> {
            Ok(serde_json::from_value(serde_json::json!({
                "tag": "#A",
                "name": "alpha",
                "trophies": 5100,
                "donations": 300,
                "donationsReceived": 10,
                "achievements": [{"name": "Games Champion", "value": 30000}]
            }))
            .unwrap())
        }
        async fn current_war(&self, _: &str) -> Result<crate::models::CurrentWar> {
            Err(FetchError::NotFound { endpoint: "/currentwar".to_string() })
        }
        async fn war_log(&self, _: &str) -> Result<crate::models::WarLog> {
            Err(FetchError::AccessDenied { endpoint: "/warlog".to_string() })
        }
        async fn capital_raid_seasons(&self, _: &str, _: usize) -> Result<crate::models::CapitalRaidSeasons> {
            Ok(Default::default())
        }
        async fn league_group(&self, _: &str) -> Result<crate::models::LeagueGroup> {
            Err(FetchError::NotFound { endpoint: "/leaguegroup".to_string() })
        }
        async fn league_war(&self, _: &str) -> Result<crate::models::LeagueWar> {
            Err(FetchError::NotFound { endpoint: "/wars".to_string() })
        }
    }

    #[tokio::test]
    async fn test_reset_waits_for_running_update() {
        let mut config = FetcherConfig::default();
        config.api.clan_tag = "2PQ8RYL".to_string();
        config.api.player_pacing_ms = 0;
        config.api.cwl_pacing_ms = 0;
        let store = Arc::new(season_engine::MemoryStore::new());
        let dyn_store: Arc<dyn SeasonStore> = store.clone();
        let pipeline =
            Arc::new(UpdatePipeline::from_config(&config, dyn_store, Arc::new(SlowRosterSource)).unwrap());

        let update = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.run_update().await }
        });
        sleep(Duration::from_millis(100)).await;
        let reset = pipeline.reset(BaselinePolicy::CarryForward, None).await.unwrap();
        let update = update.await.unwrap().unwrap();
        assert!(update.ingestion.completed_at <= reset.reset_at);
        assert_eq!(reset.scores_archived, 1);

        // The finished update's points were archived, the new season starts at zero
        let scores = store.scores(&reset.season_month).await.unwrap();
        let alpha = scores.iter().find(|s| s.player_tag.as_str() == "A").unwrap();
        assert_eq!(alpha.trophy_points, 0);
        assert_eq!(alpha.total_points, 0);
        assert!(alpha.totals_consistent());
    }

    #[tokio::test]
    async fn test_rescore_works_without_upstream() {
        let pipeline = pipeline();
        let report = pipeline.rescore().await.unwrap();
        assert_eq!(report.players_scored, 0);
        assert_eq!(report.rule_set, "tiered");
    }
}
