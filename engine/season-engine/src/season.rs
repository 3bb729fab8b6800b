//! Season lifecycle: current window, resets and roster departures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::baseline::{BaselinePolicy, BaselineTracker};
use crate::error::Result;
use crate::models::{
    season_month, Category, PlayerScore, PlayerTag, SeasonContext, SeasonWindow, TemporalKey,
};
use crate::store::{PurgeCounts, SeasonStore};

/// What happens to a player who is no longer on the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeparturePolicy {
    /// Cascade-delete the player and every dependent record
    Purge,
    /// Keep the history; inactive players are excluded from scoring
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    Archive,
    PurgeHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetReport {
    pub kind: ResetKind,
    pub reset_at: DateTime<Utc>,
    pub season_label: String,
    pub season_month: String,
    pub archive_label: String,
    pub baseline_policy: BaselinePolicy,
    pub scores_archived: usize,
    pub baselines_reset: usize,
    pub clan_games_cleared: u64,
    pub history_purged: Option<PurgeCounts>,
    pub players_reset: usize,
    pub window_opened: bool,
}

/// A reset that stopped part-way, with the counts of the steps that completed
#[derive(Error, Debug)]
#[error("Season reset failed: {message}")]
pub struct ResetFailure {
    pub message: String,
    pub partial: ResetReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartureReport {
    pub policy: DeparturePolicy,
    pub departed: Vec<PlayerTag>,
    pub purged: PurgeCounts,
    pub failures: Vec<String>,
}

pub fn archive_label(at: DateTime<Utc>) -> String {
    format!("player_scores_backup_{}", at.format("%Y%m%dT%H%M"))
}

pub struct SeasonLifecycle {
    store: Arc<dyn SeasonStore>,
    baselines: BaselineTracker,
    default_window: SeasonWindow,
}

impl SeasonLifecycle {
    pub fn new(
        store: Arc<dyn SeasonStore>,
        baselines: BaselineTracker,
        default_window: SeasonWindow,
    ) -> Self {
        Self { store, baselines, default_window }
    }

    pub fn baselines(&self) -> &BaselineTracker {
        &self.baselines
    }

    /// Latest stored window, or the configured default before the first reset
    pub async fn current_window(&self) -> Result<SeasonWindow> {
        Ok(self.store.current_window().await?.unwrap_or_else(|| self.default_window.clone()))
    }

    /// Season parameters for one batch run
    pub async fn current_context(&self, now: DateTime<Utc>) -> Result<SeasonContext> {
        Ok(SeasonContext::new(self.current_window().await?, now))
    }

    /// Archive scores and start a new window, keeping telemetry history
    pub async fn reset_season(
        &self,
        policy: BaselinePolicy,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> std::result::Result<ResetReport, ResetFailure> {
        self.run_reset(ResetKind::Archive, policy, label, now).await
    }

    /// Archive scores, start a new window and permanently delete war, CWL,
    /// capital-raid and weekly-trophy history
    pub async fn reset_season_and_purge_history(
        &self,
        policy: BaselinePolicy,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> std::result::Result<ResetReport, ResetFailure> {
        self.run_reset(ResetKind::PurgeHistory, policy, label, now).await
    }

    async fn run_reset(
        &self,
        kind: ResetKind,
        policy: BaselinePolicy,
        label: Option<String>,
        now: DateTime<Utc>,
    ) -> std::result::Result<ResetReport, ResetFailure> {
        let month = season_month(now);
        let mut report = ResetReport {
            kind,
            reset_at: now,
            season_label: label.unwrap_or_else(|| format!("Season {}", now.format("%Y-%m-%d"))),
            season_month: month.clone(),
            archive_label: archive_label(now),
            baseline_policy: policy,
            scores_archived: 0,
            baselines_reset: 0,
            clan_games_cleared: 0,
            history_purged: None,
            players_reset: 0,
            window_opened: false,
        };
        info!("Starting {:?} season reset at {} ({:?} baselines)", kind, now, policy);

        match self.reset_steps(&mut report).await {
            Ok(()) => {
                info!(
                    "Season reset complete: {} scores archived to {}, {} players reset",
                    report.scores_archived, report.archive_label, report.players_reset
                );
                Ok(report)
            }
            Err(e) => {
                error!("Season reset failed: {}", e);
                Err(ResetFailure { message: e.to_string(), partial: report })
            }
        }
    }

    async fn reset_steps(&self, report: &mut ResetReport) -> Result<()> {
        let now = report.reset_at;

        report.scores_archived =
            self.store.archive_scores(&report.season_month, &report.archive_label).await?;

        // Baselines read the raw counters, so they go before clan games are cleared
        report.baselines_reset = self.baselines.reset_all_baselines(report.baseline_policy, now).await?;

        report.clan_games_cleared = self
            .store
            .delete_by_key(Category::ClanGames, &TemporalKey::Month(report.season_month.clone()))
            .await?;

        if report.kind == ResetKind::PurgeHistory {
            let purged = self.store.purge_categories(&Category::HISTORICAL).await?;
            warn!("Purged {} historical telemetry records", purged.telemetry_total());
            report.history_purged = Some(purged);
        }

        let zeroed: Vec<PlayerScore> = self
            .store
            .players()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(|p| PlayerScore::zeroed(p.player_tag, &report.season_month, now))
            .collect();
        report.players_reset = self.store.replace_scores(&report.season_month, &zeroed).await?;

        self.store
            .open_window(&SeasonWindow { started_at: now, label: report.season_label.clone() })
            .await?;
        report.window_opened = true;
        Ok(())
    }

    /// Apply the departure policy to players that left the roster
    pub async fn handle_departures(
        &self,
        departed: &[PlayerTag],
        policy: DeparturePolicy,
    ) -> DepartureReport {
        let mut report = DepartureReport {
            policy,
            departed: departed.to_vec(),
            purged: PurgeCounts::default(),
            failures: Vec::new(),
        };
        if policy == DeparturePolicy::Retain {
            if !departed.is_empty() {
                info!("Retaining history of {} departed players", departed.len());
            }
            return report;
        }

        for tag in departed {
            match self.store.purge_player(tag).await {
                Ok(counts) => {
                    warn!("Purged departed player {} ({} rows)", tag, counts.total());
                    report.purged.merge(counts);
                }
                Err(e) => {
                    error!("Failed to purge departed player {}: {}", tag, e);
                    report.failures.push(format!("{tag}: {e}"));
                }
            }
        }
        report
    }
}
