//! Season-scoped view of the store, loaded once per run

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::baseline::season_delta;
use crate::error::Result;
use crate::models::{
    Baseline, Category, Metric, Player, PlayerTag, SeasonContext, TelemetryRecord, TemporalKey,
};
use crate::store::SeasonStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DonationTotals {
    pub given: i64,
    pub received: i64,
}

impl DonationTotals {
    pub fn balance(&self) -> i64 {
        self.given - self.received
    }

    pub fn ratio(&self) -> Option<f64> {
        (self.received > 0).then(|| self.given as f64 / self.received as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarTotals {
    pub wars: i64,
    pub stars: i64,
    pub attacks: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapitalTotals {
    pub weekends: i64,
    pub destroyed: i64,
    pub attacks: i64,
}

impl CapitalTotals {
    pub fn average_per_attack(&self) -> Option<f64> {
        (self.attacks > 0).then(|| self.destroyed as f64 / self.attacks as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CwlTotals {
    pub rounds: i64,
    pub stars: i64,
    pub attacks: i64,
}

#[derive(Debug, Clone)]
pub struct SeasonSnapshot {
    pub context: SeasonContext,
    players: BTreeMap<PlayerTag, Player>,
    baselines: BTreeMap<PlayerTag, Baseline>,
    records: BTreeMap<Category, Vec<TelemetryRecord>>,
}

impl SeasonSnapshot {
    pub async fn load(store: &dyn SeasonStore, context: SeasonContext) -> Result<Self> {
        let players = store.players().await?;
        let baselines = store.baselines().await?;
        let mut records = BTreeMap::new();
        for category in Category::ALL {
            records.insert(category, store.query_by_window(category, context.since()).await?);
        }
        Ok(Self::from_parts(context, players, baselines, records))
    }

    pub fn from_parts(
        context: SeasonContext,
        players: Vec<Player>,
        baselines: Vec<Baseline>,
        records: BTreeMap<Category, Vec<TelemetryRecord>>,
    ) -> Self {
        let since = context.since();
        let records = records
            .into_iter()
            .map(|(category, rows)| {
                let rows = rows.into_iter().filter(|r| r.observed_at >= since).collect();
                (category, rows)
            })
            .collect();
        Self {
            context,
            players: players.into_iter().map(|p| (p.player_tag.clone(), p)).collect(),
            baselines: baselines.into_iter().map(|b| (b.player_tag.clone(), b)).collect(),
            records,
        }
    }

    pub fn player(&self, player_tag: &PlayerTag) -> Option<&Player> {
        self.players.get(player_tag)
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_active)
    }

    pub fn is_active(&self, player_tag: &PlayerTag) -> bool {
        self.players.get(player_tag).map_or(false, |p| p.is_active)
    }

    pub fn baseline(&self, player_tag: &PlayerTag) -> Option<&Baseline> {
        self.baselines.get(player_tag)
    }

    /// Window-scoped records of active players
    pub fn records(&self, category: Category) -> impl Iterator<Item = &TelemetryRecord> {
        self.records
            .get(&category)
            .into_iter()
            .flatten()
            .filter(move |r| self.is_active(&r.player_tag))
    }

    /// Most recently observed record per active player
    pub fn latest_per_player(&self, category: Category) -> BTreeMap<PlayerTag, &TelemetryRecord> {
        let mut latest: BTreeMap<PlayerTag, &TelemetryRecord> = BTreeMap::new();
        for record in self.records(category) {
            match latest.get(&record.player_tag) {
                Some(current) if (current.observed_at, &current.key) >= (record.observed_at, &record.key) => {}
                _ => {
                    latest.insert(record.player_tag.clone(), record);
                }
            }
        }
        latest
    }

    /// Baseline-corrected donations of the latest snapshot per player
    pub fn donation_totals(&self) -> BTreeMap<PlayerTag, DonationTotals> {
        self.latest_per_player(Category::Donation)
            .into_iter()
            .map(|(tag, record)| {
                let (donated, received) =
                    self.baseline(&tag).map_or((0, 0), |b| (b.donated, b.received));
                let totals = DonationTotals {
                    given: season_delta(record.metric(Metric::DonationsGiven), donated),
                    received: season_delta(record.metric(Metric::DonationsReceived), received),
                };
                (tag, totals)
            })
            .collect()
    }

    pub fn clan_games_deltas(&self) -> BTreeMap<PlayerTag, i64> {
        self.latest_per_player(Category::ClanGames)
            .into_iter()
            .map(|(tag, record)| {
                let baseline = self.baseline(&tag).map_or(0, |b| b.clan_games);
                let delta = season_delta(record.metric(Metric::ClanGamesPoints), baseline);
                (tag, delta)
            })
            .collect()
    }

    pub fn trophies(&self) -> BTreeMap<PlayerTag, i64> {
        self.latest_per_player(Category::Trophy)
            .into_iter()
            .map(|(tag, record)| (tag, record.metric(Metric::Trophies)))
            .collect()
    }

    pub fn war_totals(&self) -> BTreeMap<PlayerTag, WarTotals> {
        let mut totals: BTreeMap<PlayerTag, WarTotals> = BTreeMap::new();
        for record in self.records(Category::War) {
            let entry = totals.entry(record.player_tag.clone()).or_default();
            entry.wars += 1;
            entry.stars += record.metric(Metric::Stars);
            entry.attacks += record.metric(Metric::AttacksUsed);
        }
        totals
    }

    pub fn capital_totals(&self) -> BTreeMap<PlayerTag, CapitalTotals> {
        let mut totals: BTreeMap<PlayerTag, CapitalTotals> = BTreeMap::new();
        for record in self.records(Category::CapitalRaid) {
            let entry = totals.entry(record.player_tag.clone()).or_default();
            entry.weekends += 1;
            entry.destroyed += record.metric(Metric::CapitalDestroyed);
            entry.attacks += record.metric(Metric::AttacksUsed);
        }
        totals
    }

    pub fn cwl_totals(&self) -> BTreeMap<PlayerTag, CwlTotals> {
        let mut totals: BTreeMap<PlayerTag, CwlTotals> = BTreeMap::new();
        for record in self.records(Category::Cwl) {
            let entry = totals.entry(record.player_tag.clone()).or_default();
            entry.rounds += 1;
            entry.stars += record.metric(Metric::Stars);
            entry.attacks += record.metric(Metric::AttacksUsed);
        }
        totals
    }

    /// CWL rounds in which at least one stored participant, active or not, has attacked
    pub fn completed_cwl_rounds(&self) -> BTreeSet<TemporalKey> {
        self.records
            .get(&Category::Cwl)
            .into_iter()
            .flatten()
            .filter(|r| r.metric(Metric::AttacksUsed) > 0)
            .map(|r| r.key.clone())
            .collect()
    }
}
