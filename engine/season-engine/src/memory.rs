//! In-process [`SeasonStore`] used for dry runs and tests

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{Result, SeasonError};
use crate::guard::{self, Resolution};
use crate::models::{
    Baseline, Category, ManualEdit, Player, PlayerScore, PlayerTag, RosterMember, RosterSync,
    SeasonWindow, TelemetryRecord, TemporalKey, UpsertOutcome,
};
use crate::store::{PurgeCounts, SeasonStore};

type RecordKey = (Category, PlayerTag, TemporalKey);

#[derive(Default)]
struct MemoryState {
    players: BTreeMap<PlayerTag, Player>,
    records: BTreeMap<RecordKey, TelemetryRecord>,
    baselines: BTreeMap<PlayerTag, Baseline>,
    windows: Vec<SeasonWindow>,
    scores: BTreeMap<(String, PlayerTag), PlayerScore>,
    archives: BTreeMap<String, Vec<PlayerScore>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a player directly, bypassing roster sync
    pub async fn insert_player(&self, player: Player) {
        let mut state = self.state.write().await;
        state.players.insert(player.player_tag.clone(), player);
    }

    pub async fn windows(&self) -> Vec<SeasonWindow> {
        self.state.read().await.windows.clone()
    }

    pub async fn archive(&self, label: &str) -> Option<Vec<PlayerScore>> {
        self.state.read().await.archives.get(label).cloned()
    }

    pub async fn record_count(&self, category: Category) -> usize {
        self.state.read().await.records.keys().filter(|(c, _, _)| *c == category).count()
    }
}

#[async_trait::async_trait]
impl SeasonStore for MemoryStore {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn sync_roster(&self, members: &[RosterMember], now: DateTime<Utc>) -> Result<RosterSync> {
        let mut state = self.state.write().await;
        let mut sync = RosterSync::default();

        for member in members {
            match state.players.get_mut(&member.player_tag) {
                Some(player) => {
                    if !player.is_active {
                        player.is_active = true;
                        player.joined_at = now;
                        sync.reactivated.push(member.player_tag.clone());
                    }
                    player.player_name = member.player_name.clone();
                    player.updated_at = now;
                }
                None => {
                    state.players.insert(
                        member.player_tag.clone(),
                        Player {
                            player_tag: member.player_tag.clone(),
                            player_name: member.player_name.clone(),
                            joined_at: now,
                            last_seen: None,
                            is_active: true,
                            updated_at: now,
                        },
                    );
                    sync.added.push(member.player_tag.clone());
                }
            }
        }

        for player in state.players.values_mut() {
            let present = members.iter().any(|m| m.player_tag == player.player_tag);
            if player.is_active && !present {
                player.is_active = false;
                player.updated_at = now;
                sync.departed.push(player.player_tag.clone());
            }
        }

        sync.active_count = state.players.values().filter(|p| p.is_active).count();
        Ok(sync)
    }

    async fn players(&self) -> Result<Vec<Player>> {
        Ok(self.state.read().await.players.values().cloned().collect())
    }

    async fn player(&self, player_tag: &PlayerTag) -> Result<Option<Player>> {
        Ok(self.state.read().await.players.get(player_tag).cloned())
    }

    async fn touch_last_seen(&self, player_tag: &PlayerTag, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let player = state
            .players
            .get_mut(player_tag)
            .ok_or_else(|| SeasonError::PlayerNotFound { player_tag: player_tag.to_string() })?;
        player.last_seen = Some(player.last_seen.map_or(at, |seen| seen.max(at)));
        Ok(())
    }

    async fn purge_player(&self, player_tag: &PlayerTag) -> Result<PurgeCounts> {
        let mut state = self.state.write().await;
        let mut counts = PurgeCounts::default();

        let doomed: Vec<RecordKey> =
            state.records.keys().filter(|(_, tag, _)| tag == player_tag).cloned().collect();
        for key in doomed {
            state.records.remove(&key);
            counts.add_telemetry(key.0, 1);
        }

        let before = state.scores.len();
        state.scores.retain(|(_, tag), _| tag != player_tag);
        counts.scores = (before - state.scores.len()) as u64;

        if state.baselines.remove(player_tag).is_some() {
            counts.baselines = 1;
        }
        if state.players.remove(player_tag).is_some() {
            counts.players = 1;
        }
        Ok(counts)
    }

    async fn upsert(&self, record: TelemetryRecord) -> Result<UpsertOutcome> {
        let mut state = self.state.write().await;
        let key = (record.category, record.player_tag.clone(), record.key.clone());
        let existing = state.records.get(&key).cloned();
        let resolution = guard::resolve_upsert(existing, record)?;
        let outcome = resolution.outcome();
        if let Resolution::Insert(resolved) | Resolution::Update(resolved) = resolution {
            state.records.insert(key, resolved);
        }
        Ok(outcome)
    }

    async fn apply_manual_edit(&self, edit: &ManualEdit) -> Result<TelemetryRecord> {
        let mut state = self.state.write().await;
        let key = (edit.category, edit.player_tag.clone(), edit.key.clone());
        let edited = guard::apply_edit(state.records.get(&key).cloned(), edit)?;
        state.records.insert(key, edited.clone());
        Ok(edited)
    }

    async fn record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<Option<TelemetryRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(&(category, player_tag.clone(), key.clone())).cloned())
    }

    async fn query_by_window(
        &self,
        category: Category,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.category == category && r.observed_at >= since)
            .cloned()
            .collect())
    }

    async fn latest_for_player(
        &self,
        category: Category,
        player_tag: &PlayerTag,
    ) -> Result<Option<TelemetryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.category == category && &r.player_tag == player_tag)
            .max_by_key(|r| (r.observed_at, r.key.clone()))
            .cloned())
    }

    async fn delete_record(
        &self,
        category: Category,
        player_tag: &PlayerTag,
        key: &TemporalKey,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.records.remove(&(category, player_tag.clone(), key.clone())).is_some())
    }

    async fn delete_by_key(&self, category: Category, key: &TemporalKey) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|(c, _, k), _| !(*c == category && k == key));
        Ok((before - state.records.len()) as u64)
    }

    async fn purge_categories(&self, categories: &[Category]) -> Result<PurgeCounts> {
        let mut state = self.state.write().await;
        let mut counts = PurgeCounts::default();
        for category in categories {
            let before = state.records.len();
            state.records.retain(|(c, _, _), _| c != category);
            counts.add_telemetry(*category, (before - state.records.len()) as u64);
        }
        Ok(counts)
    }

    async fn baselines(&self) -> Result<Vec<Baseline>> {
        Ok(self.state.read().await.baselines.values().cloned().collect())
    }

    async fn baseline(&self, player_tag: &PlayerTag) -> Result<Option<Baseline>> {
        Ok(self.state.read().await.baselines.get(player_tag).cloned())
    }

    async fn put_baseline(&self, baseline: &Baseline) -> Result<()> {
        let mut state = self.state.write().await;
        state.baselines.insert(baseline.player_tag.clone(), baseline.clone());
        Ok(())
    }

    async fn current_window(&self) -> Result<Option<SeasonWindow>> {
        Ok(self.state.read().await.windows.last().cloned())
    }

    async fn open_window(&self, window: &SeasonWindow) -> Result<()> {
        self.state.write().await.windows.push(window.clone());
        Ok(())
    }

    async fn scores(&self, season_month: &str) -> Result<Vec<PlayerScore>> {
        let state = self.state.read().await;
        Ok(state
            .scores
            .iter()
            .filter(|((month, _), _)| month == season_month)
            .map(|(_, score)| score.clone())
            .collect())
    }

    async fn replace_scores(&self, season_month: &str, scores: &[PlayerScore]) -> Result<usize> {
        let mut state = self.state.write().await;
        state.scores.retain(|(month, _), _| month != season_month);
        for score in scores {
            state
                .scores
                .insert((season_month.to_string(), score.player_tag.clone()), score.clone());
        }
        Ok(scores.len())
    }

    async fn archive_scores(&self, season_month: &str, label: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let rows: Vec<PlayerScore> = state
            .scores
            .iter()
            .filter(|((month, _), _)| month == season_month)
            .map(|(_, score)| score.clone())
            .collect();
        let count = rows.len();
        state.archives.entry(label.to_string()).or_default().extend(rows);
        Ok(count)
    }
}
