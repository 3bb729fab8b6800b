//! Storage seam for players, telemetry, baselines, season windows and scores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{
    Baseline, Category, ManualEdit, Player, PlayerScore, PlayerTag, RosterMember, RosterSync,
    SeasonWindow, TelemetryRecord, TemporalKey, UpsertOutcome,
};

/// Counts of rows removed by a purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub telemetry: BTreeMap<Category, u64>,
    pub scores: u64,
    pub baselines: u64,
    pub players: u64,
}

impl PurgeCounts {
    pub fn add_telemetry(&mut self, category: Category, count: u64) {
        if count > 0 {
            *self.telemetry.entry(category).or_default() += count;
        }
    }

    pub fn telemetry_total(&self) -> u64 {
        self.telemetry.values().sum()
    }

    pub fn total(&self) -> u64 {
        self.telemetry_total() + self.scores + self.baselines + self.players
    }

    pub fn merge(&mut self, other: PurgeCounts) {
        for (category, count) in other.telemetry {
            self.add_telemetry(category, count);
        }
        self.scores += other.scores;
        self.baselines += other.baselines;
        self.players += other.players;
    }
}

/// Record store used by ingestion, scoring and the season lifecycle.
///
/// Telemetry writes must go through [`crate::guard`]: `upsert` resolves with
/// [`crate::guard::resolve_upsert`] and `apply_manual_edit` with
/// [`crate::guard::apply_edit`], each as a single write per record.
#[async_trait::async_trait]
pub trait SeasonStore: Send + Sync {
    /// Prepare the backing storage (schema migrations)
    async fn migrate(&self) -> Result<()>;

    /// Reconcile stored players with the authoritative roster
    async fn sync_roster(&self, members: &[RosterMember], now: DateTime<Utc>) -> Result<RosterSync>;

    async fn players(&self) -> Result<Vec<Player>>;

    async fn player(&self, player_tag: &PlayerTag) -> Result<Option<Player>>;

    async fn touch_last_seen(&self, player_tag: &PlayerTag, at: DateTime<Utc>) -> Result<()>;

    /// Delete a player and every dependent record
    async fn purge_player(&self, player_tag: &PlayerTag) -> Result<PurgeCounts>;

    async fn upsert(&self, record: TelemetryRecord) -> Result<UpsertOutcome>;

    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<TelemetryRecord>;

    async fn record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<Option<TelemetryRecord>>;

    /// All records of `category` observed at or after `since`
    async fn query_by_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>>;

    /// Most recently observed record of `category` for one player
    async fn latest_for_player(
        &self,
        category: Category,
        player_tag: &PlayerTag,
    ) -> Result<Option<TelemetryRecord>>;

    async fn delete_record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<bool>;

    /// Delete every record sharing `key` in `category`, across players
    async fn delete_by_key(&self, category: Category, key: &TemporalKey) -> Result<u64>;

    async fn purge_categories(&self, categories: &[Category]) -> Result<PurgeCounts>;

    async fn baselines(&self) -> Result<Vec<Baseline>>;

    async fn baseline(&self, player_tag: &PlayerTag) -> Result<Option<Baseline>>;

    async fn put_baseline(&self, baseline: &Baseline) -> Result<()>;

    /// Most recently opened season window
    async fn current_window(&self) -> Result<Option<SeasonWindow>>;

    async fn open_window(&self, window: &SeasonWindow) -> Result<()>;

    async fn scores(&self, season_month: &str) -> Result<Vec<PlayerScore>>;

    /// Replace every score row of `season_month` with `scores`
    async fn replace_scores(&self, season_month: &str, scores: &[PlayerScore]) -> Result<usize>;

    /// Copy the score rows of `season_month` into the archive under `label`
    async fn archive_scores(&self, season_month: &str, label: &str) -> Result<usize>;
}
