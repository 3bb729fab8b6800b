//! Dashboard reads and administrative commands
//!
//! Every admin edit goes through the store's manual-override path and is
//! followed by a scoring run, so the scoreboard reflects the correction
//! immediately.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use clash_fetcher::{UpdatePipeline, UpdateReport};
use season_engine::models::week_start;
use season_engine::views::{
    self, CapitalRow, CwlRow, DonationRow, DonationSort, EventRow, ScoreboardRow, WarRow,
    WeeklyTrophyRow,
};
use season_engine::{
    BaselinePolicy, Category, ManualEdit, Metric, Metrics, PlayerTag, ResetReport, ScoringReport,
    SeasonContext, SeasonError, SeasonSnapshot, SeasonStore, TelemetryRecord, TemporalKey,
};

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Deserialize)]
pub struct WarEdit {
    pub player_tag: String,
    pub war_tag: String,
    pub stars: i64,
    pub attacks: i64,
}

/// Edit of one round of the current CWL season
#[derive(Debug, Clone, Deserialize)]
pub struct CwlEdit {
    pub player_tag: String,
    pub round: u32,
    pub stars: i64,
    pub attacks: i64,
}

/// Edit of the player's latest capital raid weekend
#[derive(Debug, Clone, Deserialize)]
pub struct CapitalEdit {
    pub player_tag: String,
    pub attacks: i64,
    #[serde(default)]
    pub destroyed: Option<i64>,
}

/// Season clan games points, not the raw lifetime counter
#[derive(Debug, Clone, Deserialize)]
pub struct ClanGamesEdit {
    pub player_tag: String,
    pub points: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeeklyTrophyEdit {
    pub player_tag: String,
    /// Any day of the week; defaults to the current week
    #[serde(default)]
    pub week: Option<NaiveDate>,
    pub points: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseRequest {
    pub category: Category,
    pub player_tag: String,
    /// Temporal key in its stored form, e.g. `2025-09#3` for a CWL round
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub baseline_policy: Option<BaselinePolicy>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub record: TelemetryRecord,
    pub scoring: ScoringReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
    pub scoring: ScoringReport,
}

pub struct DashboardService {
    store: Arc<dyn SeasonStore>,
    pipeline: Arc<UpdatePipeline>,
}

impl DashboardService {
    pub fn new(store: Arc<dyn SeasonStore>, pipeline: Arc<UpdatePipeline>) -> Self {
        Self { store, pipeline }
    }

    async fn context(&self) -> Result<SeasonContext> {
        Ok(self.pipeline.lifecycle().current_context(Utc::now()).await?)
    }

    async fn snapshot(&self) -> Result<SeasonSnapshot> {
        let context = self.context().await?;
        Ok(SeasonSnapshot::load(self.store.as_ref(), context).await?)
    }

    pub async fn scoreboard(&self) -> Result<Vec<ScoreboardRow>> {
        let snapshot = self.snapshot().await?;
        let scores = self.store.scores(&snapshot.context.season_month).await?;
        Ok(views::scoreboard(&snapshot, scores))
    }

    pub async fn penalties(&self) -> Result<Vec<ScoreboardRow>> {
        let snapshot = self.snapshot().await?;
        let scores = self.store.scores(&snapshot.context.season_month).await?;
        Ok(views::penalty_board(&snapshot, scores))
    }

    pub async fn donations(&self, sort: DonationSort) -> Result<Vec<DonationRow>> {
        Ok(views::donations(&self.snapshot().await?, sort))
    }

    pub async fn wars(&self) -> Result<Vec<WarRow>> {
        let attacks_per_war = self.pipeline.engine().rules().attacks_per_war;
        Ok(views::wars(&self.snapshot().await?, attacks_per_war))
    }

    pub async fn capital(&self) -> Result<Vec<CapitalRow>> {
        Ok(views::capital(&self.snapshot().await?))
    }

    pub async fn cwl(&self) -> Result<Vec<CwlRow>> {
        Ok(views::cwl(&self.snapshot().await?))
    }

    pub async fn events(&self) -> Result<Vec<EventRow>> {
        Ok(views::events(&self.snapshot().await?))
    }

    pub async fn weekly_trophies(&self, week: Option<NaiveDate>) -> Result<Vec<WeeklyTrophyRow>> {
        let snapshot = self.snapshot().await?;
        let week = resolve_week(week, snapshot.context.now);
        Ok(views::weekly_trophies(&snapshot, week))
    }

    /// Protected write of `metrics` followed by a scoring run
    async fn edit(
        &self,
        category: Category,
        player_tag: PlayerTag,
        key: TemporalKey,
        metrics: Metrics,
        protect: bool,
    ) -> Result<EditOutcome> {
        self.require_player(&player_tag).await?;
        let record = self
            .store
            .apply_manual_edit(&ManualEdit {
                category,
                player_tag,
                key,
                metrics,
                protect,
                edited_at: Utc::now(),
            })
            .await?;
        info!(
            "✏️ Admin edit of {} record {} for {} (protected: {})",
            category, record.key, record.player_tag, record.manually_edited
        );
        let scoring = self.pipeline.rescore().await?;
        Ok(EditOutcome { record, scoring })
    }

    async fn require_player(&self, player_tag: &PlayerTag) -> Result<()> {
        match self.store.player(player_tag).await? {
            Some(_) => Ok(()),
            None => Err(SeasonError::PlayerNotFound { player_tag: player_tag.to_string() }.into()),
        }
    }

    pub async fn edit_war(&self, edit: WarEdit) -> Result<EditOutcome> {
        if edit.war_tag.trim().is_empty() {
            return Err(ServiceError::InvalidRequest { message: "war_tag is empty".to_string() });
        }
        let metrics = Metrics::new().with(Metric::Stars, edit.stars).with(Metric::AttacksUsed, edit.attacks);
        self.edit(
            Category::War,
            PlayerTag::new(&edit.player_tag),
            TemporalKey::War(edit.war_tag.trim().to_string()),
            metrics,
            true,
        )
        .await
    }

    pub async fn edit_cwl(&self, edit: CwlEdit) -> Result<EditOutcome> {
        let key = self.cwl_round_key(edit.round).await?;
        let metrics = Metrics::new().with(Metric::Stars, edit.stars).with(Metric::AttacksUsed, edit.attacks);
        self.edit(Category::Cwl, PlayerTag::new(&edit.player_tag), key, metrics, true).await
    }

    pub async fn edit_capital(&self, edit: CapitalEdit) -> Result<EditOutcome> {
        let player_tag = PlayerTag::new(&edit.player_tag);
        let latest = self
            .store
            .latest_for_player(Category::CapitalRaid, &player_tag)
            .await?
            .ok_or_else(|| SeasonError::RecordNotFound {
                category: Category::CapitalRaid.to_string(),
                player_tag: player_tag.to_string(),
                key: "latest weekend".to_string(),
            })?;
        let destroyed = edit.destroyed.unwrap_or_else(|| latest.metric(Metric::CapitalDestroyed));
        let metrics = Metrics::new()
            .with(Metric::AttacksUsed, edit.attacks)
            .with(Metric::CapitalDestroyed, destroyed);
        self.edit(Category::CapitalRaid, player_tag, latest.key, metrics, true).await
    }

    /// Stores raw = baseline + points so the season delta equals `points`
    pub async fn edit_clan_games(&self, edit: ClanGamesEdit) -> Result<EditOutcome> {
        let player_tag = PlayerTag::new(&edit.player_tag);
        if edit.points < 0 {
            return Err(ServiceError::InvalidRequest { message: "points must not be negative".to_string() });
        }
        let baseline = self
            .store
            .baseline(&player_tag)
            .await?
            .ok_or_else(|| ServiceError::NoBaseline { player_tag: player_tag.to_string() })?;
        let context = self.context().await?;
        let metrics = Metrics::new().with(Metric::ClanGamesPoints, baseline.clan_games + edit.points);
        self.edit(Category::ClanGames, player_tag, TemporalKey::Month(context.season_month), metrics, true)
            .await
    }

    pub async fn edit_weekly_trophies(&self, edit: WeeklyTrophyEdit) -> Result<EditOutcome> {
        let week = resolve_week(edit.week, Utc::now());
        let metrics = Metrics::new().with(Metric::Trophies, edit.points);
        self.edit(
            Category::WeeklyTrophy,
            PlayerTag::new(&edit.player_tag),
            TemporalKey::Date(week),
            metrics,
            true,
        )
        .await
    }

    /// Clear the override flag; the next ingestion may overwrite the record again
    pub async fn release_override(&self, request: ReleaseRequest) -> Result<EditOutcome> {
        let player_tag = PlayerTag::new(&request.player_tag);
        let key = request.category.parse_key(&request.key)?;
        let record = self
            .store
            .record(request.category, &player_tag, &key)
            .await?
            .ok_or_else(|| SeasonError::RecordNotFound {
                category: request.category.to_string(),
                player_tag: player_tag.to_string(),
                key: key.to_string(),
            })?;
        self.edit(request.category, player_tag, key, record.metrics, false).await
    }

    pub async fn delete_cwl_round(&self, player_tag: &str, round: u32) -> Result<DeleteOutcome> {
        let player_tag = PlayerTag::new(player_tag);
        let key = self.cwl_round_key(round).await?;
        let deleted = self.store.delete_record(Category::Cwl, &player_tag, &key).await?;
        info!("🗑️ Deleted CWL record {} for {}: {}", key, player_tag, deleted);
        let scoring = self.pipeline.rescore().await?;
        Ok(DeleteOutcome { deleted, scoring })
    }

    async fn cwl_round_key(&self, round: u32) -> Result<TemporalKey> {
        if round == 0 {
            return Err(ServiceError::InvalidRequest { message: "CWL rounds start at 1".to_string() });
        }
        let context = self.context().await?;
        Ok(TemporalKey::CwlRound { season: context.season_month, round })
    }

    pub async fn run_update(&self) -> Result<UpdateReport> {
        Ok(self.pipeline.run_update().await?)
    }

    /// Archive scores and open a new season; `purge_history` also deletes
    /// war, CWL, capital and weekly trophy records
    pub async fn reset(&self, request: ResetRequest, purge_history: bool) -> Result<ResetReport> {
        let policy = request.baseline_policy.unwrap_or(BaselinePolicy::CarryForward);
        let report = if purge_history {
            self.pipeline.reset_and_purge(policy, request.label).await?
        } else {
            self.pipeline.reset(policy, request.label).await?
        };
        info!("🔁 Season reset to {} ({:?})", report.season_label, report.kind);
        Ok(report)
    }
}

fn resolve_week(week: Option<NaiveDate>, now: DateTime<Utc>) -> NaiveDate {
    match week {
        Some(day) => week_start(day.and_time(NaiveTime::MIN).and_utc()),
        None => week_start(now),
    }
}
