use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SeasonError};

/// External player identifier, stored without the leading `#`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerTag(String);

impl PlayerTag {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('#').to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag in the form the external API expects (`#ABC123`)
    pub fn with_hash(&self) -> String {
        format!("#{}", self.0)
    }
}

impl fmt::Display for PlayerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerTag {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Clan member identity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Player {
    pub fn tenure(&self, now: DateTime<Utc>) -> Duration {
        now - self.joined_at
    }

    /// Active and in the clan for at least `min_tenure_days`
    pub fn is_eligible(&self, now: DateTime<Utc>, min_tenure_days: i64) -> bool {
        self.is_active && self.tenure(now) >= Duration::days(min_tenure_days)
    }

    /// Whole days since the last detected activity, falling back to the join time
    pub fn days_inactive(&self, now: DateTime<Utc>) -> i64 {
        let reference = self.last_seen.unwrap_or(self.joined_at);
        (now - reference).num_days().max(0)
    }
}

/// One entry of the authoritative external roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterMember {
    pub player_tag: PlayerTag,
    pub player_name: String,
}

/// Result of reconciling the stored players against the external roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterSync {
    pub added: Vec<PlayerTag>,
    pub reactivated: Vec<PlayerTag>,
    pub departed: Vec<PlayerTag>,
    pub active_count: usize,
}

/// Telemetry category; each one is its own logical table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Donation,
    Trophy,
    WeeklyTrophy,
    War,
    CapitalRaid,
    Cwl,
    ClanGames,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Donation,
        Category::Trophy,
        Category::WeeklyTrophy,
        Category::War,
        Category::CapitalRaid,
        Category::Cwl,
        Category::ClanGames,
    ];

    /// Categories deleted by the history-purging season reset
    pub const HISTORICAL: [Category; 4] =
        [Category::War, Category::Cwl, Category::CapitalRaid, Category::WeeklyTrophy];

    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            Category::Donation => &[Metric::DonationsGiven, Metric::DonationsReceived],
            Category::Trophy | Category::WeeklyTrophy => &[Metric::Trophies],
            Category::War | Category::Cwl => &[Metric::Stars, Metric::AttacksUsed],
            Category::CapitalRaid => &[Metric::CapitalDestroyed, Metric::AttacksUsed],
            Category::ClanGames => &[Metric::ClanGamesPoints],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Donation => "donation",
            Category::Trophy => "trophy",
            Category::WeeklyTrophy => "weekly_trophy",
            Category::War => "war",
            Category::CapitalRaid => "capital_raid",
            Category::Cwl => "cwl",
            Category::ClanGames => "clan_games",
        }
    }

    /// Decode a stored temporal key for this category
    pub fn parse_key(&self, encoded: &str) -> Result<TemporalKey> {
        let malformed = |message: &str| SeasonError::malformed(self, "-", format!("{message}: {encoded}"));
        match self {
            Category::Donation | Category::WeeklyTrophy | Category::CapitalRaid => {
                NaiveDate::parse_from_str(encoded, "%Y-%m-%d")
                    .map(TemporalKey::Date)
                    .map_err(|_| malformed("invalid date key"))
            }
            Category::Trophy | Category::ClanGames => {
                if is_season_month(encoded) {
                    Ok(TemporalKey::Month(encoded.to_string()))
                } else {
                    Err(malformed("invalid month key"))
                }
            }
            Category::War => {
                if encoded.is_empty() {
                    Err(malformed("empty war tag"))
                } else {
                    Ok(TemporalKey::War(encoded.to_string()))
                }
            }
            Category::Cwl => {
                let (season, round) =
                    encoded.split_once('#').ok_or_else(|| malformed("invalid round key"))?;
                let round = round.parse::<u32>().map_err(|_| malformed("invalid round number"))?;
                Ok(TemporalKey::CwlRound { season: season.to_string(), round })
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw metric carried by a telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    DonationsGiven,
    DonationsReceived,
    Trophies,
    Stars,
    AttacksUsed,
    CapitalDestroyed,
    ClanGamesPoints,
}

/// How a stored metric reconciles with a newer observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Never regress: partial mid-event reads must not erase a larger value
    MonotonicMax,
    /// Point-in-time value, the latest observation replaces
    LastWriteWins,
}

impl MergePolicy {
    pub fn merge(&self, old: i64, new: i64) -> i64 {
        match self {
            MergePolicy::MonotonicMax => old.max(new),
            MergePolicy::LastWriteWins => new,
        }
    }
}

impl Metric {
    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            Metric::Stars
            | Metric::AttacksUsed
            | Metric::CapitalDestroyed
            | Metric::ClanGamesPoints => MergePolicy::MonotonicMax,
            Metric::DonationsGiven | Metric::DonationsReceived | Metric::Trophies => {
                MergePolicy::LastWriteWins
            }
        }
    }

    /// Column name used by the relational store
    pub fn column(&self) -> &'static str {
        match self {
            Metric::DonationsGiven => "donations_given",
            Metric::DonationsReceived => "donations_received",
            Metric::Trophies => "trophies",
            Metric::Stars => "stars",
            Metric::AttacksUsed => "attacks_used",
            Metric::CapitalDestroyed => "capital_destroyed",
            Metric::ClanGamesPoints => "clan_games_points",
        }
    }
}

/// Natural key of a telemetry record, unique per player within a category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemporalKey {
    Date(NaiveDate),
    Month(String),
    War(String),
    CwlRound { season: String, round: u32 },
}

impl TemporalKey {
    pub fn encode(&self) -> String {
        match self {
            TemporalKey::Date(date) => date.format("%Y-%m-%d").to_string(),
            TemporalKey::Month(month) => month.clone(),
            TemporalKey::War(tag) => tag.clone(),
            TemporalKey::CwlRound { season, round } => format!("{season}#{round}"),
        }
    }
}

impl fmt::Display for TemporalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Metric values of a single record; absent metrics read as zero
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<Metric, i64>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: Metric, value: i64) -> Self {
        self.0.insert(metric, value);
        self
    }

    pub fn get(&self, metric: Metric) -> i64 {
        self.0.get(&metric).copied().unwrap_or(0)
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.0.contains_key(&metric)
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        self.0.insert(metric, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, i64)> + '_ {
        self.0.iter().map(|(metric, value)| (*metric, *value))
    }
}

/// One externally observed measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub category: Category,
    pub player_tag: PlayerTag,
    pub key: TemporalKey,
    /// Temporal lower-bound column for season-window queries
    pub observed_at: DateTime<Utc>,
    pub metrics: Metrics,
    pub manually_edited: bool,
}

impl TelemetryRecord {
    pub fn observed(
        category: Category,
        player_tag: PlayerTag,
        key: TemporalKey,
        observed_at: DateTime<Utc>,
        metrics: Metrics,
    ) -> Self {
        Self { category, player_tag, key, observed_at, metrics, manually_edited: false }
    }

    pub fn metric(&self, metric: Metric) -> i64 {
        self.metrics.get(metric)
    }

    /// Reject negative counters and metrics foreign to the category
    pub fn validate(&self) -> Result<()> {
        let allowed = self.category.metrics();
        for (metric, value) in self.metrics.iter() {
            if !allowed.contains(&metric) {
                return Err(SeasonError::malformed(
                    self.category,
                    &self.player_tag,
                    format!("metric {metric:?} does not belong to this category"),
                ));
            }
            if value < 0 {
                return Err(SeasonError::malformed(
                    self.category,
                    &self.player_tag,
                    format!("negative value {value} for {metric:?}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Applied,
    /// Record is under manual override; nothing was written
    Skipped,
}

/// Administrative correction of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEdit {
    pub category: Category,
    pub player_tag: PlayerTag,
    pub key: TemporalKey,
    pub metrics: Metrics,
    /// Value written to `manually_edited`; `false` releases an override
    pub protect: bool,
    pub edited_at: DateTime<Utc>,
}

/// Checkpoint of the monotonically increasing external counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub player_tag: PlayerTag,
    pub donated: i64,
    pub received: i64,
    pub clan_games: i64,
    pub baseline_at: DateTime<Utc>,
}

impl Baseline {
    pub fn zero(player_tag: PlayerTag, baseline_at: DateTime<Utc>) -> Self {
        Self { player_tag, donated: 0, received: 0, clan_games: 0, baseline_at }
    }

    pub fn counter(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Donated => self.donated,
            Counter::Received => self.received,
            Counter::ClanGames => self.clan_games,
        }
    }
}

/// Baseline-tracked counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Donated,
    Received,
    ClanGames,
}

/// Start of the current scoring season; the latest window is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonWindow {
    pub started_at: DateTime<Utc>,
    pub label: String,
}

/// Per-run season parameters threaded through every calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonContext {
    pub window: SeasonWindow,
    pub season_month: String,
    pub now: DateTime<Utc>,
}

impl SeasonContext {
    pub fn new(window: SeasonWindow, now: DateTime<Utc>) -> Self {
        Self { window, season_month: season_month(now), now }
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.window.started_at
    }
}

/// Calendar month label (`YYYY-MM`) used to key scores and monthly records
pub fn season_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

fn is_season_month(value: &str) -> bool {
    NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok() && value.len() == 7
}

/// Monday of the ISO week containing `at`
pub fn week_start(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Point-bearing score fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Donation,
    Trophy,
    War,
    Cwl,
    Capital,
    ClanGames,
}

/// Penalty fields, typically zero or negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyField {
    Donation,
    War,
    Capital,
    Cwl,
    ClanGames,
    Inactivity,
}

/// Score sheet of one player for one season month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_tag: PlayerTag,
    pub season_month: String,
    pub donation_points: i32,
    pub trophy_points: i32,
    pub war_points: i32,
    pub cwl_points: i32,
    pub capital_points: i32,
    pub clan_games_points: i32,
    pub donation_penalty: i32,
    pub war_penalty: i32,
    pub capital_penalty: i32,
    pub cwl_penalty: i32,
    pub clan_games_penalty: i32,
    pub inactivity_penalty: i32,
    pub total_penalties: i32,
    pub total_points: i32,
    pub last_updated: DateTime<Utc>,
}

impl PlayerScore {
    pub fn zeroed(player_tag: PlayerTag, season_month: &str, at: DateTime<Utc>) -> Self {
        Self {
            player_tag,
            season_month: season_month.to_string(),
            donation_points: 0,
            trophy_points: 0,
            war_points: 0,
            cwl_points: 0,
            capital_points: 0,
            clan_games_points: 0,
            donation_penalty: 0,
            war_penalty: 0,
            capital_penalty: 0,
            cwl_penalty: 0,
            clan_games_penalty: 0,
            inactivity_penalty: 0,
            total_penalties: 0,
            total_points: 0,
            last_updated: at,
        }
    }

    fn points_mut(&mut self, field: ScoreField) -> &mut i32 {
        match field {
            ScoreField::Donation => &mut self.donation_points,
            ScoreField::Trophy => &mut self.trophy_points,
            ScoreField::War => &mut self.war_points,
            ScoreField::Cwl => &mut self.cwl_points,
            ScoreField::Capital => &mut self.capital_points,
            ScoreField::ClanGames => &mut self.clan_games_points,
        }
    }

    fn penalty_mut(&mut self, field: PenaltyField) -> &mut i32 {
        match field {
            PenaltyField::Donation => &mut self.donation_penalty,
            PenaltyField::War => &mut self.war_penalty,
            PenaltyField::Capital => &mut self.capital_penalty,
            PenaltyField::Cwl => &mut self.cwl_penalty,
            PenaltyField::ClanGames => &mut self.clan_games_penalty,
            PenaltyField::Inactivity => &mut self.inactivity_penalty,
        }
    }

    pub fn points(&self, field: ScoreField) -> i32 {
        match field {
            ScoreField::Donation => self.donation_points,
            ScoreField::Trophy => self.trophy_points,
            ScoreField::War => self.war_points,
            ScoreField::Cwl => self.cwl_points,
            ScoreField::Capital => self.capital_points,
            ScoreField::ClanGames => self.clan_games_points,
        }
    }

    pub fn penalty(&self, field: PenaltyField) -> i32 {
        match field {
            PenaltyField::Donation => self.donation_penalty,
            PenaltyField::War => self.war_penalty,
            PenaltyField::Capital => self.capital_penalty,
            PenaltyField::Cwl => self.cwl_penalty,
            PenaltyField::ClanGames => self.clan_games_penalty,
            PenaltyField::Inactivity => self.inactivity_penalty,
        }
    }

    pub fn set_points(&mut self, field: ScoreField, points: i32) {
        *self.points_mut(field) = points;
    }

    pub fn add_points(&mut self, field: ScoreField, points: i32) {
        *self.points_mut(field) += points;
    }

    pub fn set_penalty(&mut self, field: PenaltyField, penalty: i32) {
        *self.penalty_mut(field) = penalty;
    }

    pub fn category_points(&self) -> i32 {
        self.donation_points
            + self.trophy_points
            + self.war_points
            + self.cwl_points
            + self.capital_points
            + self.clan_games_points
    }

    pub fn penalty_sum(&self) -> i32 {
        self.donation_penalty
            + self.war_penalty
            + self.capital_penalty
            + self.cwl_penalty
            + self.clan_games_penalty
            + self.inactivity_penalty
    }

    pub fn recompute_totals(&mut self) {
        self.total_penalties = self.penalty_sum();
        self.total_points = self.category_points() + self.total_penalties;
    }

    pub fn totals_consistent(&self) -> bool {
        self.total_penalties == self.penalty_sum()
            && self.total_points == self.category_points() + self.total_penalties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_player_tag_normalization() {
        assert_eq!(PlayerTag::new("#abc123").as_str(), "ABC123");
        assert_eq!(PlayerTag::new(" ABC123 ").with_hash(), "#ABC123");
        assert_eq!(PlayerTag::from("#2PP"), PlayerTag::new("2pp"));
    }

    #[test]
    fn test_merge_policies() {
        assert_eq!(Metric::Stars.merge_policy().merge(3, 1), 3);
        assert_eq!(Metric::CapitalDestroyed.merge_policy().merge(100, 900), 900);
        assert_eq!(Metric::Trophies.merge_policy().merge(5000, 4800), 4800);
        assert_eq!(Metric::DonationsGiven.merge_policy().merge(500, 20), 20);
    }

    #[test]
    fn test_temporal_key_parsing() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 12).unwrap();
        assert_eq!(Category::Donation.parse_key("2025-09-12").unwrap(), TemporalKey::Date(date));
        assert_eq!(
            Category::Cwl.parse_key("2025-09#3").unwrap(),
            TemporalKey::CwlRound { season: "2025-09".to_string(), round: 3 }
        );
        assert_eq!(
            Category::Trophy.parse_key("2025-09").unwrap(),
            TemporalKey::Month("2025-09".to_string())
        );
        assert!(Category::Trophy.parse_key("2025-9").is_err());
        assert!(Category::Cwl.parse_key("2025-09").is_err());
        assert!(Category::CapitalRaid.parse_key("garbage").is_err());

        let key = TemporalKey::CwlRound { season: "2025-10".to_string(), round: 7 };
        assert_eq!(Category::Cwl.parse_key(&key.encode()).unwrap(), key);
    }

    #[test]
    fn test_temporal_key_json() {
        let keys = [
            TemporalKey::Date(NaiveDate::from_ymd_opt(2025, 9, 12).unwrap()),
            TemporalKey::Month("2025-09".to_string()),
            TemporalKey::War("20250912T1800_8RY".to_string()),
            TemporalKey::CwlRound { season: "2025-09".to_string(), round: 3 },
        ];
        for key in keys {
            let json = serde_json::to_value(&key).unwrap();
            assert!(json.get("kind").is_some());
            let back: TemporalKey = serde_json::from_value(json).unwrap();
            assert_eq!(back, key);
        }

        let war = serde_json::to_value(TemporalKey::War("W1".to_string())).unwrap();
        assert_eq!(war, serde_json::json!({ "kind": "war", "value": "W1" }));
    }

    #[test]
    fn test_record_serializes_with_key() {
        let at = Utc.with_ymd_and_hms(2025, 9, 10, 0, 0, 0).unwrap();
        let record = TelemetryRecord::observed(
            Category::ClanGames,
            PlayerTag::new("P1"),
            TemporalKey::Month("2025-09".to_string()),
            at,
            Metrics::new().with(Metric::ClanGamesPoints, 12000),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""key":{"kind":"month","value":"2025-09"}"#));
    }

    #[test]
    fn test_record_validation() {
        let at = Utc.with_ymd_and_hms(2025, 9, 10, 0, 0, 0).unwrap();
        let ok = TelemetryRecord::observed(
            Category::War,
            PlayerTag::new("P1"),
            TemporalKey::War("W1".to_string()),
            at,
            Metrics::new().with(Metric::Stars, 3).with(Metric::AttacksUsed, 2),
        );
        assert!(ok.validate().is_ok());

        let mut foreign = ok.clone();
        foreign.metrics.set(Metric::Trophies, 10);
        assert!(foreign.validate().is_err());

        let mut negative = ok;
        negative.metrics.set(Metric::Stars, -1);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_week_start_and_month() {
        // 2025-09-12 is a Friday
        let at = Utc.with_ymd_and_hms(2025, 9, 12, 18, 30, 0).unwrap();
        assert_eq!(week_start(at), NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        assert_eq!(season_month(at), "2025-09");
    }

    #[test]
    fn test_score_totals() {
        let at = Utc.with_ymd_and_hms(2025, 9, 12, 0, 0, 0).unwrap();
        let mut score = PlayerScore::zeroed(PlayerTag::new("P1"), "2025-09", at);
        score.set_points(ScoreField::Donation, 4);
        score.add_points(ScoreField::Donation, 3);
        score.set_points(ScoreField::War, 10);
        score.set_penalty(PenaltyField::Capital, -3);
        score.set_penalty(PenaltyField::Inactivity, -2);
        score.recompute_totals();

        assert_eq!(score.donation_points, 7);
        assert_eq!(score.total_penalties, -5);
        assert_eq!(score.total_points, 12);
        assert!(score.totals_consistent());
    }

    #[test]
    fn test_player_eligibility() {
        let now = Utc.with_ymd_and_hms(2025, 9, 20, 0, 0, 0).unwrap();
        let mut player = Player {
            player_tag: PlayerTag::new("P1"),
            player_name: "One".to_string(),
            joined_at: now - Duration::days(3),
            last_seen: None,
            is_active: true,
            updated_at: now,
        };
        assert!(!player.is_eligible(now, 7));
        player.joined_at = now - Duration::days(7);
        assert!(player.is_eligible(now, 7));
        player.is_active = false;
        assert!(!player.is_eligible(now, 7));
        assert_eq!(player.days_inactive(now), 7);
    }
}
