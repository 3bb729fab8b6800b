//! Read-only aggregates served to the dashboard

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::models::{Category, Metric, PlayerScore, PlayerTag, TemporalKey};
use crate::snapshot::SeasonSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreboardRow {
    pub player_name: String,
    #[serde(flatten)]
    pub score: PlayerScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonationRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub donated: i64,
    pub received: i64,
    pub balance: i64,
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationSort {
    #[default]
    Balance,
    Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub wars: i64,
    pub stars: i64,
    pub attacks: i64,
    pub average_stars: f64,
    pub real_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapitalRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub weekends: i64,
    pub destroyed: i64,
    pub attacks: i64,
    pub average_per_attack: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CwlRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub rounds: i64,
    pub stars: i64,
    pub attacks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub clan_games_points: i64,
    pub trophies: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyTrophyRow {
    pub player_tag: PlayerTag,
    pub player_name: String,
    pub week_start: NaiveDate,
    pub trophies: i64,
    pub manually_edited: bool,
}

fn name_of(snapshot: &SeasonSnapshot, tag: &PlayerTag) -> String {
    snapshot.player(tag).map_or_else(|| tag.to_string(), |p| p.player_name.clone())
}

fn by_name(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Scores of active players, highest total first
pub fn scoreboard(snapshot: &SeasonSnapshot, scores: Vec<PlayerScore>) -> Vec<ScoreboardRow> {
    let mut rows: Vec<ScoreboardRow> = scores
        .into_iter()
        .filter(|s| snapshot.is_active(&s.player_tag))
        .map(|score| ScoreboardRow { player_name: name_of(snapshot, &score.player_tag), score })
        .collect();
    rows.sort_by(|a, b| {
        b.score
            .total_points
            .cmp(&a.score.total_points)
            .then_with(|| by_name(&a.player_name, &b.player_name))
    });
    rows
}

/// Players carrying any penalty, most penalized first
pub fn penalty_board(snapshot: &SeasonSnapshot, scores: Vec<PlayerScore>) -> Vec<ScoreboardRow> {
    let mut rows: Vec<ScoreboardRow> = scoreboard(snapshot, scores)
        .into_iter()
        .filter(|row| row.score.total_penalties < 0)
        .collect();
    rows.sort_by(|a, b| {
        a.score
            .total_penalties
            .cmp(&b.score.total_penalties)
            .then_with(|| by_name(&a.player_name, &b.player_name))
    });
    rows
}

pub fn donations(snapshot: &SeasonSnapshot, sort: DonationSort) -> Vec<DonationRow> {
    let mut rows: Vec<DonationRow> = snapshot
        .donation_totals()
        .into_iter()
        .map(|(tag, totals)| DonationRow {
            player_name: name_of(snapshot, &tag),
            player_tag: tag,
            donated: totals.given,
            received: totals.received,
            balance: totals.balance(),
            ratio: totals.ratio(),
        })
        .collect();
    rows.sort_by(|a, b| {
        let primary = match sort {
            DonationSort::Balance => b.balance.cmp(&a.balance),
            DonationSort::Quantity => b.donated.cmp(&a.donated),
        };
        primary.then_with(|| by_name(&a.player_name, &b.player_name))
    });
    rows
}

pub fn wars(snapshot: &SeasonSnapshot, attacks_per_war: i64) -> Vec<WarRow> {
    let max_stars = (attacks_per_war * 3) as f64;
    let mut rows: Vec<WarRow> = snapshot
        .war_totals()
        .into_iter()
        .map(|(tag, totals)| {
            let wars = totals.wars.max(1) as f64;
            WarRow {
                player_name: name_of(snapshot, &tag),
                player_tag: tag,
                wars: totals.wars,
                stars: totals.stars,
                attacks: totals.attacks,
                average_stars: totals.stars as f64 / wars,
                real_average: totals.stars as f64 / (wars * max_stars),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| by_name(&a.player_name, &b.player_name)));
    rows
}

pub fn capital(snapshot: &SeasonSnapshot) -> Vec<CapitalRow> {
    let mut rows: Vec<CapitalRow> = snapshot
        .capital_totals()
        .into_iter()
        .map(|(tag, totals)| CapitalRow {
            player_name: name_of(snapshot, &tag),
            player_tag: tag,
            weekends: totals.weekends,
            destroyed: totals.destroyed,
            attacks: totals.attacks,
            average_per_attack: totals.average_per_attack().unwrap_or(0.0),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.destroyed.cmp(&a.destroyed).then_with(|| by_name(&a.player_name, &b.player_name))
    });
    rows
}

pub fn cwl(snapshot: &SeasonSnapshot) -> Vec<CwlRow> {
    let mut rows: Vec<CwlRow> = snapshot
        .cwl_totals()
        .into_iter()
        .map(|(tag, totals)| CwlRow {
            player_name: name_of(snapshot, &tag),
            player_tag: tag,
            rounds: totals.rounds,
            stars: totals.stars,
            attacks: totals.attacks,
        })
        .collect();
    rows.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| by_name(&a.player_name, &b.player_name)));
    rows
}

pub fn events(snapshot: &SeasonSnapshot) -> Vec<EventRow> {
    let clan_games = snapshot.clan_games_deltas();
    let trophies = snapshot.trophies();
    let mut rows: Vec<EventRow> = snapshot
        .active_players()
        .map(|p| EventRow {
            player_tag: p.player_tag.clone(),
            player_name: p.player_name.clone(),
            clan_games_points: clan_games.get(&p.player_tag).copied().unwrap_or(0),
            trophies: trophies.get(&p.player_tag).copied().unwrap_or(0),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.clan_games_points
            .cmp(&a.clan_games_points)
            .then_with(|| b.trophies.cmp(&a.trophies))
            .then_with(|| by_name(&a.player_name, &b.player_name))
    });
    rows
}

pub fn weekly_trophies(snapshot: &SeasonSnapshot, week_start: NaiveDate) -> Vec<WeeklyTrophyRow> {
    let key = TemporalKey::Date(week_start);
    let mut rows: Vec<WeeklyTrophyRow> = snapshot
        .records(Category::WeeklyTrophy)
        .filter(|r| r.key == key)
        .map(|r| WeeklyTrophyRow {
            player_tag: r.player_tag.clone(),
            player_name: name_of(snapshot, &r.player_tag),
            week_start,
            trophies: r.metric(Metric::Trophies),
            manually_edited: r.manually_edited,
        })
        .collect();
    rows.sort_by(|a, b| b.trophies.cmp(&a.trophies).then_with(|| by_name(&a.player_name, &b.player_name)));
    rows
}
