//! Tiered leaderboard calculator
//!
//! A category is a [`CategoryRule`]: a ranking source, a tier table, a slot
//! count and an accumulation mode. One executor interprets every rule.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, SeasonError};
use crate::models::{PlayerScore, PlayerTag};
use crate::rules::{Accumulation, CategoryRule, PointTable, RankingSource, RuleSet};
use crate::snapshot::SeasonSnapshot;

/// (player, metric) pairs a category ranks
pub type Ranking = Vec<(PlayerTag, f64)>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Award {
    pub player_tag: PlayerTag,
    pub rank: usize,
    pub metric: f64,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryOutcome {
    pub name: String,
    pub awards: Vec<Award>,
}

/// Per-player metric for `source`, keeping only positive contributions
pub fn ranking(snapshot: &SeasonSnapshot, source: RankingSource, rules: &RuleSet) -> Ranking {
    let rows: Vec<(PlayerTag, f64)> = match source {
        RankingSource::DonationsGiven => snapshot
            .donation_totals()
            .into_iter()
            .map(|(tag, totals)| (tag, totals.given as f64))
            .collect(),
        RankingSource::DonationBalance => snapshot
            .donation_totals()
            .into_iter()
            .map(|(tag, totals)| (tag, totals.balance() as f64))
            .collect(),
        RankingSource::DonationRatio => snapshot
            .donation_totals()
            .into_iter()
            .filter_map(|(tag, totals)| totals.ratio().map(|ratio| (tag, ratio)))
            .collect(),
        RankingSource::CapitalTotal => snapshot
            .capital_totals()
            .into_iter()
            .map(|(tag, totals)| (tag, totals.destroyed as f64))
            .collect(),
        RankingSource::CapitalAverage => snapshot
            .capital_totals()
            .into_iter()
            .filter_map(|(tag, totals)| totals.average_per_attack().map(|avg| (tag, avg)))
            .collect(),
        RankingSource::WarStars => snapshot
            .war_totals()
            .into_iter()
            .map(|(tag, totals)| (tag, totals.stars as f64))
            .collect(),
        RankingSource::WarAverage => {
            let max_stars_per_war = (rules.attacks_per_war * 3) as f64;
            snapshot
                .war_totals()
                .into_iter()
                .filter(|(_, totals)| totals.wars > 0)
                .map(|(tag, totals)| (tag, totals.stars as f64 / (totals.wars as f64 * max_stars_per_war)))
                .collect()
        }
        RankingSource::Trophies => {
            snapshot.trophies().into_iter().map(|(tag, value)| (tag, value as f64)).collect()
        }
        RankingSource::CwlStars => snapshot
            .cwl_totals()
            .into_iter()
            .map(|(tag, totals)| (tag, totals.stars as f64))
            .collect(),
        RankingSource::ClanGames => snapshot
            .clan_games_deltas()
            .into_iter()
            .map(|(tag, delta)| (tag, delta as f64))
            .collect(),
    };
    rows.into_iter().filter(|(_, value)| *value > 0.0).collect()
}

/// Rank `ranking` and assign points from `table`.
///
/// Higher metrics rank first; ties fall back to ascending player tag so the
/// assignment is stable across runs.
pub fn compute_category(
    rule: &CategoryRule,
    table: &PointTable,
    mut ranking: Ranking,
) -> Result<CategoryOutcome> {
    if let Some((tag, value)) = ranking.iter().find(|(_, value)| !value.is_finite()) {
        return Err(SeasonError::malformed(
            &rule.name,
            tag,
            format!("non-finite ranking metric {value}"),
        ));
    }

    ranking.sort_by(|(tag_a, a), (tag_b, b)| b.total_cmp(a).then_with(|| tag_a.cmp(tag_b)));

    let slots = rule.slots.min(table.len());
    let awards = ranking
        .into_iter()
        .take(slots)
        .enumerate()
        .filter_map(|(index, (player_tag, metric))| {
            let rank = index + 1;
            table.points_for_rank(rank).map(|points| Award { player_tag, rank, metric, points })
        })
        .collect();

    Ok(CategoryOutcome { name: rule.name.clone(), awards })
}

/// Write a category's awards into the run's score sheets
pub fn apply_awards(
    sheets: &mut BTreeMap<PlayerTag, PlayerScore>,
    rule: &CategoryRule,
    outcome: &CategoryOutcome,
) -> usize {
    let mut applied = 0;
    for award in &outcome.awards {
        let Some(score) = sheets.get_mut(&award.player_tag) else {
            debug!("No score sheet for {} in {}", award.player_tag, rule.name);
            continue;
        };
        match rule.mode {
            Accumulation::Replace => score.set_points(rule.field, award.points),
            Accumulation::Add => score.add_points(rule.field, award.points),
        }
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreField;
    use chrono::Utc;

    fn rule(slots: usize, mode: Accumulation) -> CategoryRule {
        CategoryRule {
            name: "donations_amount".to_string(),
            source: RankingSource::DonationsGiven,
            field: ScoreField::Donation,
            tier: "low".to_string(),
            slots,
            mode,
        }
    }

    fn low() -> PointTable {
        PointTable::new(vec![5, 4, 3, 2, 1])
    }

    fn pairs(values: &[(&str, f64)]) -> Ranking {
        values.iter().map(|(tag, v)| (PlayerTag::new(tag), *v)).collect()
    }

    #[test]
    fn test_ranks_descending_and_slices_slots() {
        let outcome = compute_category(
            &rule(3, Accumulation::Replace),
            &low(),
            pairs(&[("A", 10.0), ("B", 80.0), ("C", 40.0), ("D", 5.0)]),
        )
        .unwrap();
        let ranked: Vec<(&str, i32)> =
            outcome.awards.iter().map(|a| (a.player_tag.as_str(), a.points)).collect();
        assert_eq!(ranked, vec![("B", 5), ("C", 4), ("A", 3)]);
    }

    #[test]
    fn test_slots_capped_by_table_length() {
        let outcome = compute_category(
            &rule(15, Accumulation::Replace),
            &low(),
            pairs(&[("A", 7.0), ("B", 6.0), ("C", 5.0), ("D", 4.0), ("E", 3.0), ("F", 2.0)]),
        )
        .unwrap();
        assert_eq!(outcome.awards.len(), 5);
    }

    #[test]
    fn test_ties_are_stable_by_tag() {
        let input = pairs(&[("ZED", 50.0), ("ALF", 50.0), ("MID", 50.0)]);
        let first = compute_category(&rule(5, Accumulation::Replace), &low(), input.clone()).unwrap();
        let mut reversed = input;
        reversed.reverse();
        let second = compute_category(&rule(5, Accumulation::Replace), &low(), reversed).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.awards[0].player_tag.as_str(), "ALF");
        assert_eq!(first.awards[2].player_tag.as_str(), "ZED");
    }

    #[test]
    fn test_non_finite_metric_fails_category() {
        let result =
            compute_category(&rule(5, Accumulation::Replace), &low(), pairs(&[("A", f64::NAN)]));
        assert!(matches!(result, Err(SeasonError::MalformedRecord { .. })));
    }

    #[test]
    fn test_replace_then_add() {
        let now = Utc::now();
        let mut sheets = BTreeMap::from([(
            PlayerTag::new("A"),
            PlayerScore::zeroed(PlayerTag::new("A"), "2025-09", now),
        )]);
        let amount = rule(5, Accumulation::Replace);
        let balance = CategoryRule { name: "donations_balance".to_string(), ..rule(5, Accumulation::Add) };

        let outcome = compute_category(&amount, &low(), pairs(&[("A", 80.0), ("B", 90.0)])).unwrap();
        assert_eq!(apply_awards(&mut sheets, &amount, &outcome), 1);
        let outcome = compute_category(&balance, &low(), pairs(&[("A", 80.0)])).unwrap();
        apply_awards(&mut sheets, &balance, &outcome);

        assert_eq!(sheets[&PlayerTag::new("A")].donation_points, 4 + 5);
    }
}
