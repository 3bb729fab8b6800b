//! Ingestion pipeline: pull game API data into the season store
//!
//! Every stage is isolated. An upstream failure (private war log, no CWL
//! group, a player profile that times out) skips that item and is listed in
//! the report; store failures abort the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use season_engine::models::week_start;
use season_engine::{
    Category, DeparturePolicy, DepartureReport, Metric, Metrics, PlayerTag, RawCounters,
    RosterMember, RosterSync, SeasonContext, SeasonLifecycle, SeasonStore, TelemetryRecord,
    TemporalKey, UpsertOutcome,
};

use crate::client::ClanDataSource;
use crate::config::ClashApiConfig;
use crate::error::{FetchError, Result};
use crate::models::{PlayerProfile, WarClan};
use crate::timestamps::{estimate_capital_attacks, generate_war_tag, parse_api_timestamp};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub player_pacing: Duration,
    pub cwl_pacing: Duration,
    pub max_capital_seasons: usize,
    pub departure_policy: DeparturePolicy,
}

impl IngestOptions {
    pub fn new(api: &ClashApiConfig, departure_policy: DeparturePolicy) -> Self {
        Self {
            player_pacing: Duration::from_millis(api.player_pacing_ms),
            cwl_pacing: Duration::from_millis(api.cwl_pacing_ms),
            max_capital_seasons: api.max_capital_seasons,
            departure_policy,
        }
    }
}

/// Upsert outcomes of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertTally {
    pub inserted: usize,
    pub applied: usize,
    pub protected: usize,
}

impl UpsertTally {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Applied => self.applied += 1,
            UpsertOutcome::Skipped => self.protected += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.applied
    }
}

/// Upstream item that could not be read this run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub roster: RosterSync,
    pub departures: DepartureReport,
    pub players_updated: usize,
    pub players_marked_active: usize,
    pub current_war: Option<String>,
    pub finished_wars_in_log: usize,
    pub capital_weekends: usize,
    pub cwl_rounds: usize,
    pub records: UpsertTally,
    pub skipped: Vec<SkippedSource>,
}

pub struct Ingestor {
    source: Arc<dyn ClanDataSource>,
    store: Arc<dyn SeasonStore>,
    lifecycle: Arc<SeasonLifecycle>,
    clan_tag: String,
    options: IngestOptions,
}

/// Per-run mutable state shared by the stages
struct Run<'a> {
    context: &'a SeasonContext,
    active: BTreeSet<PlayerTag>,
    records: UpsertTally,
    skipped: Vec<SkippedSource>,
}

impl Run<'_> {
    /// Record a skippable failure, propagate anything else
    fn skip(&mut self, source: impl Into<String>, error: FetchError) -> Result<()> {
        if !error.is_skippable() {
            return Err(error);
        }
        let source = source.into();
        warn!("Skipping {}: {}", source, error);
        self.skipped.push(SkippedSource { source, reason: error.to_string() });
        Ok(())
    }
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn ClanDataSource>,
        store: Arc<dyn SeasonStore>,
        lifecycle: Arc<SeasonLifecycle>,
        clan_tag: String,
        options: IngestOptions,
    ) -> Self {
        Self { source, store, lifecycle, clan_tag, options }
    }

    pub async fn run(&self, context: &SeasonContext) -> Result<IngestionReport> {
        let started_at = Utc::now();
        info!("🔄 Ingesting clan {} for window starting {}", self.clan_tag, context.since());

        let clan = self.source.clan(&self.clan_tag).await?;
        if clan.member_list.is_empty() {
            // Never reconcile against an empty roster: that would depart everyone
            return Err(FetchError::EmptyRoster { clan_tag: self.clan_tag.clone() });
        }
        let members: Vec<RosterMember> = clan
            .member_list
            .iter()
            .map(|m| RosterMember { player_tag: PlayerTag::new(&m.tag), player_name: m.name.clone() })
            .collect();

        let roster = self.store.sync_roster(&members, context.now).await?;
        info!(
            "👥 Roster: {} active, {} added, {} reactivated, {} departed",
            roster.active_count,
            roster.added.len(),
            roster.reactivated.len(),
            roster.departed.len()
        );
        let departures =
            self.lifecycle.handle_departures(&roster.departed, self.options.departure_policy).await;

        let mut run = Run {
            context,
            active: members.iter().map(|m| m.player_tag.clone()).collect(),
            records: UpsertTally::default(),
            skipped: Vec::new(),
        };

        let mut players_updated = 0;
        let mut players_marked_active = 0;
        for (index, member) in members.iter().enumerate() {
            if index > 0 && !self.options.player_pacing.is_zero() {
                sleep(self.options.player_pacing).await;
            }
            match self.source.player(member.player_tag.as_str()).await {
                Ok(profile) => {
                    if self.ingest_profile(&mut run, &member.player_tag, &profile).await? {
                        players_marked_active += 1;
                    }
                    players_updated += 1;
                }
                Err(e) => run.skip(format!("player {}", member.player_tag), e)?,
            }
        }

        let current_war = self.ingest_current_war(&mut run).await?;
        let finished_wars_in_log = self.count_war_log(&mut run).await?;
        let capital_weekends = self.ingest_capital(&mut run).await?;
        let cwl_rounds = self.ingest_cwl(&mut run).await?;

        let report = IngestionReport {
            started_at,
            completed_at: Utc::now(),
            roster,
            departures,
            players_updated,
            players_marked_active,
            current_war,
            finished_wars_in_log,
            capital_weekends,
            cwl_rounds,
            records: run.records,
            skipped: run.skipped,
        };
        info!(
            "✅ Ingestion finished: {} players, {} records written, {} protected, {} skipped sources",
            report.players_updated,
            report.records.written(),
            report.records.protected,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn upsert(
        &self,
        run: &mut Run<'_>,
        category: Category,
        player_tag: &PlayerTag,
        key: TemporalKey,
        metrics: Metrics,
    ) -> Result<()> {
        let record =
            TelemetryRecord::observed(category, player_tag.clone(), key, run.context.now, metrics);
        let outcome = self.store.upsert(record).await?;
        if outcome == UpsertOutcome::Skipped {
            debug!("{} record of {} is under manual override", category, player_tag);
        }
        run.records.record(outcome);
        Ok(())
    }

    /// Store one player's profile counters. Returns whether activity was detected.
    async fn ingest_profile(
        &self,
        run: &mut Run<'_>,
        player_tag: &PlayerTag,
        profile: &PlayerProfile,
    ) -> Result<bool> {
        let now = run.context.now;
        let raw = RawCounters {
            donated: profile.donations,
            received: profile.donations_received,
            clan_games: profile.clan_games_total(),
        };
        self.lifecycle.baselines().get_baseline(player_tag, raw, now).await?;

        let previous_donation = self.store.latest_for_player(Category::Donation, player_tag).await?;
        let previous_trophies = self.store.latest_for_player(Category::Trophy, player_tag).await?;
        let active = match &previous_donation {
            None => true,
            Some(previous) => {
                raw.donated > previous.metric(Metric::DonationsGiven)
                    || previous_trophies
                        .as_ref()
                        .map_or(true, |t| t.metric(Metric::Trophies) != profile.trophies)
            }
        };
        if active {
            self.store.touch_last_seen(player_tag, now).await?;
        }

        let month = TemporalKey::Month(run.context.season_month.clone());
        self.upsert(
            run,
            Category::Donation,
            player_tag,
            TemporalKey::Date(now.date_naive()),
            Metrics::new()
                .with(Metric::DonationsGiven, raw.donated)
                .with(Metric::DonationsReceived, raw.received),
        )
        .await?;
        let trophies = Metrics::new().with(Metric::Trophies, profile.trophies);
        self.upsert(run, Category::Trophy, player_tag, month.clone(), trophies.clone()).await?;
        self.upsert(run, Category::WeeklyTrophy, player_tag, TemporalKey::Date(week_start(now)), trophies)
            .await?;
        self.upsert(
            run,
            Category::ClanGames,
            player_tag,
            month,
            Metrics::new().with(Metric::ClanGamesPoints, raw.clan_games),
        )
        .await?;
        Ok(active)
    }

    async fn store_war_side(
        &self,
        run: &mut Run<'_>,
        side: &WarClan,
        category: Category,
        key: &TemporalKey,
    ) -> Result<usize> {
        let mut stored = 0;
        for member in &side.members {
            let tag = PlayerTag::new(&member.tag);
            if !run.active.contains(&tag) {
                debug!("Ignoring war member {} who is not on the roster", tag);
                continue;
            }
            let metrics = Metrics::new()
                .with(Metric::Stars, member.stars())
                .with(Metric::AttacksUsed, member.attacks_used());
            self.upsert(run, category, &tag, key.clone(), metrics).await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Regular war in progress. Returns its generated war tag when stored.
    async fn ingest_current_war(&self, run: &mut Run<'_>) -> Result<Option<String>> {
        let war = match self.source.current_war(&self.clan_tag).await {
            Ok(war) => war,
            Err(e) => {
                run.skip("current war", e)?;
                return Ok(None);
            }
        };
        if !war.is_in_war() {
            info!("⚪ No current war");
            return Ok(None);
        }
        if war.is_cwl() {
            debug!("Current war is a CWL war, handled by the league pipeline");
            return Ok(None);
        }
        let Some(clan) = &war.clan else {
            return Ok(None);
        };

        let started = parse_api_timestamp(war.started());
        if started < run.context.since() {
            info!("Current war started {} before the season window, skipping", started);
            return Ok(None);
        }
        let war_tag = generate_war_tag(started, &self.clan_tag);
        let stored = self.store_war_side(run, clan, Category::War, &TemporalKey::War(war_tag.clone())).await?;
        info!("⚔️ War {} ({}): {} participants", war_tag, war.state, stored);
        Ok(Some(war_tag))
    }

    /// Finished wars in the public log since the window opened
    async fn count_war_log(&self, run: &mut Run<'_>) -> Result<usize> {
        let log = match self.source.war_log(&self.clan_tag).await {
            Ok(log) => log,
            Err(e) => {
                run.skip("war log", e)?;
                return Ok(0);
            }
        };
        let since = run.context.since();
        let finished = log
            .items
            .iter()
            .filter(|entry| entry.is_finished() && entry.end_time.is_some())
            .take_while(|entry| parse_api_timestamp(entry.end_time.as_deref()) >= since)
            .count();
        debug!("War log: {} finished wars in window", finished);
        Ok(finished)
    }

    async fn ingest_capital(&self, run: &mut Run<'_>) -> Result<usize> {
        let seasons = match self
            .source
            .capital_raid_seasons(&self.clan_tag, self.options.max_capital_seasons)
            .await
        {
            Ok(seasons) => seasons,
            Err(e) => {
                run.skip("capital raid seasons", e)?;
                return Ok(0);
            }
        };

        let since = run.context.since();
        let mut weekends = 0;
        for season in seasons
            .items
            .iter()
            .filter(|s| parse_api_timestamp(Some(&s.start_time)) >= since)
            .take(self.options.max_capital_seasons)
        {
            let key = TemporalKey::Date(parse_api_timestamp(Some(&season.start_time)).date_naive());
            for member in &season.members {
                let tag = PlayerTag::new(&member.tag);
                if !run.active.contains(&tag) {
                    continue;
                }
                let attacks = if member.attack_count > 0 {
                    member.attack_count
                } else {
                    estimate_capital_attacks(member.capital_resources_looted)
                };
                let metrics = Metrics::new()
                    .with(Metric::CapitalDestroyed, member.capital_resources_looted)
                    .with(Metric::AttacksUsed, attacks);
                self.upsert(run, Category::CapitalRaid, &tag, key.clone(), metrics).await?;
            }
            weekends += 1;
        }
        info!("🏰 Capital: {} weekends in window", weekends);
        Ok(weekends)
    }

    async fn ingest_cwl(&self, run: &mut Run<'_>) -> Result<usize> {
        let group = match self.source.league_group(&self.clan_tag).await {
            Ok(group) => group,
            Err(FetchError::NotFound { .. }) => {
                info!("No CWL group this month");
                return Ok(0);
            }
            Err(e) => {
                run.skip("cwl league group", e)?;
                return Ok(0);
            }
        };

        let since = run.context.since();
        let mut rounds = BTreeSet::new();
        let mut first_request = true;
        for (index, round) in group.rounds.iter().enumerate() {
            let round_number = index as u32 + 1;
            for war_tag in round.scheduled_wars() {
                if !first_request && !self.options.cwl_pacing.is_zero() {
                    sleep(self.options.cwl_pacing).await;
                }
                first_request = false;

                let war = match self.source.league_war(war_tag).await {
                    Ok(war) => war,
                    Err(e) => {
                        run.skip(format!("cwl war {war_tag}"), e)?;
                        continue;
                    }
                };
                let Some(side) = war.side(&self.clan_tag) else {
                    continue;
                };
                if parse_api_timestamp(war.start_time.as_deref()) < since {
                    continue;
                }
                let key = TemporalKey::CwlRound { season: group.season.clone(), round: round_number };
                if self.store_war_side(run, side, Category::Cwl, &key).await? > 0 {
                    rounds.insert(round_number);
                }
            }
        }
        info!("🏆 CWL {}: {} rounds stored", group.season, rounds.len());
        Ok(rounds.len())
    }
}
