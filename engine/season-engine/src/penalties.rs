//! Penalty rules
//!
//! Each rule returns the non-zero adjustments it assigns, keyed by player.
//! Only players passing the tenure gate are ever considered.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SeasonError};
use crate::models::{Category, Metric, PenaltyField, PlayerScore, PlayerTag};
use crate::rules::{
    CapitalPenaltyRule, ClanGamesPenaltyRule, CwlPenaltyMode, CwlPenaltyRule,
    DonationPenaltyRule, InactivityPenaltyRule, WarPenaltyRule,
};
use crate::snapshot::SeasonSnapshot;

pub type Penalties = BTreeMap<PlayerTag, i32>;

/// Active players whose tenure reaches `min_tenure_days`
pub fn eligible_players(snapshot: &SeasonSnapshot, min_tenure_days: i64) -> BTreeSet<PlayerTag> {
    snapshot
        .active_players()
        .filter(|p| p.is_eligible(snapshot.context.now, min_tenure_days))
        .map(|p| p.player_tag.clone())
        .collect()
}

fn to_i32(value: i64, rule: &str, tag: &PlayerTag) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| SeasonError::malformed(rule, tag, format!("penalty {value} out of range")))
}

pub fn donation_penalties(
    snapshot: &SeasonSnapshot,
    rule: &DonationPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    let mut negative: Vec<(PlayerTag, i64)> = snapshot
        .donation_totals()
        .into_iter()
        .filter(|(tag, _)| eligible.contains(tag))
        .map(|(tag, totals)| (tag, totals.balance()))
        .filter(|(_, balance)| *balance < 0)
        .collect();
    negative.sort_by(|(tag_a, a), (tag_b, b)| a.cmp(b).then_with(|| tag_a.cmp(tag_b)));

    Ok(negative
        .into_iter()
        .take(rule.worst)
        .filter_map(|(tag, balance)| {
            rule.thresholds
                .iter()
                .find(|t| balance <= t.at_or_below)
                .map(|t| (tag, t.penalty))
        })
        .collect())
}

pub fn war_penalties(
    snapshot: &SeasonSnapshot,
    rule: &WarPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    let mut penalties = Penalties::new();
    for (tag, totals) in snapshot.war_totals() {
        if !eligible.contains(&tag) {
            continue;
        }
        let expected = totals.wars * rule.attacks_per_war;
        let missed = (expected - totals.attacks).max(0);
        if missed > 0 {
            let penalty = to_i32(missed * rule.per_missed_attack as i64, "war_penalty", &tag)?;
            penalties.insert(tag, penalty);
        }
    }
    Ok(penalties)
}

pub fn capital_penalties(
    snapshot: &SeasonSnapshot,
    rule: &CapitalPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    let mut penalties = Penalties::new();
    for record in snapshot.records(Category::CapitalRaid) {
        if !eligible.contains(&record.player_tag) {
            continue;
        }
        let destroyed = record.metric(Metric::CapitalDestroyed);
        let penalty = if destroyed == 0 {
            rule.zero_weekend
        } else if destroyed < rule.minimum_destroyed {
            rule.low_weekend
        } else {
            0
        };
        if penalty != 0 {
            *penalties.entry(record.player_tag.clone()).or_default() += penalty;
        }
    }
    Ok(penalties)
}

pub fn cwl_penalties(
    snapshot: &SeasonSnapshot,
    rule: &CwlPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    let completed = snapshot.completed_cwl_rounds();
    let mut missed: BTreeMap<PlayerTag, i64> = BTreeMap::new();
    for record in snapshot.records(Category::Cwl) {
        if !eligible.contains(&record.player_tag) || !completed.contains(&record.key) {
            continue;
        }
        let shortfall = (rule.attacks_per_round - record.metric(Metric::AttacksUsed)).max(0);
        if shortfall > 0 {
            *missed.entry(record.player_tag.clone()).or_default() += shortfall;
        }
    }

    missed
        .into_iter()
        .map(|(tag, count)| {
            let penalty = match rule.mode {
                CwlPenaltyMode::PerMissedAttack => to_i32(count * rule.penalty as i64, "cwl_penalty", &tag)?,
                CwlPenaltyMode::FlatIfAnyMissed => rule.penalty,
            };
            Ok((tag, penalty))
        })
        .collect()
}

pub fn clan_games_penalties(
    snapshot: &SeasonSnapshot,
    rule: &ClanGamesPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    let deltas = snapshot.clan_games_deltas();
    if !deltas.values().any(|delta| *delta > 0) {
        // Event has not started for anyone yet
        return Ok(Penalties::new());
    }

    Ok(eligible
        .iter()
        .filter_map(|tag| {
            let delta = deltas.get(tag).copied().unwrap_or(0);
            let penalty = if delta == 0 {
                rule.zero_points
            } else if delta < rule.minimum_points {
                rule.low_points
            } else {
                0
            };
            (penalty != 0).then(|| (tag.clone(), penalty))
        })
        .collect())
}

pub fn inactivity_penalties(
    snapshot: &SeasonSnapshot,
    rule: &InactivityPenaltyRule,
    eligible: &BTreeSet<PlayerTag>,
) -> Result<Penalties> {
    Ok(snapshot
        .active_players()
        .filter(|p| eligible.contains(&p.player_tag))
        .filter_map(|p| {
            let penalty = rule.penalty_for(p.days_inactive(snapshot.context.now));
            (penalty != 0).then(|| (p.player_tag.clone(), penalty))
        })
        .collect())
}

/// Write one rule's penalties into the score sheets
pub fn apply_penalties(
    sheets: &mut BTreeMap<PlayerTag, PlayerScore>,
    field: PenaltyField,
    penalties: &Penalties,
) -> usize {
    let mut applied = 0;
    for (tag, penalty) in penalties {
        if let Some(score) = sheets.get_mut(tag) {
            score.set_penalty(field, *penalty);
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Baseline, Metrics, Player, SeasonContext, SeasonWindow, TelemetryRecord,
        TemporalKey,
    };
    use crate::rules::RuleSet;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        start() + Duration::days(20)
    }

    fn veteran(tag: &str) -> Player {
        Player {
            player_tag: PlayerTag::new(tag),
            player_name: tag.to_string(),
            joined_at: start() - Duration::days(60),
            last_seen: Some(now()),
            is_active: true,
            updated_at: now(),
        }
    }

    fn snapshot(players: Vec<Player>, baselines: Vec<Baseline>, records: Vec<TelemetryRecord>) -> SeasonSnapshot {
        let mut by_category: BTreeMap<Category, Vec<TelemetryRecord>> = BTreeMap::new();
        for record in records {
            by_category.entry(record.category).or_default().push(record);
        }
        SeasonSnapshot::from_parts(
            SeasonContext::new(SeasonWindow { started_at: start(), label: "S".to_string() }, now()),
            players,
            baselines,
            by_category,
        )
    }

    fn record(category: Category, tag: &str, key: TemporalKey, metrics: Metrics) -> TelemetryRecord {
        TelemetryRecord::observed(category, PlayerTag::new(tag), key, start() + Duration::days(2), metrics)
    }

    fn donation(tag: &str, given: i64, received: i64) -> TelemetryRecord {
        record(
            Category::Donation,
            tag,
            TemporalKey::Date(NaiveDate::from_ymd_opt(2025, 9, 3).unwrap()),
            Metrics::new().with(Metric::DonationsGiven, given).with(Metric::DonationsReceived, received),
        )
    }

    fn weekend(tag: &str, day: u32, destroyed: i64) -> TelemetryRecord {
        record(
            Category::CapitalRaid,
            tag,
            TemporalKey::Date(NaiveDate::from_ymd_opt(2025, 9, day).unwrap()),
            Metrics::new().with(Metric::CapitalDestroyed, destroyed).with(Metric::AttacksUsed, 6),
        )
    }

    fn all_eligible(snapshot: &SeasonSnapshot) -> BTreeSet<PlayerTag> {
        eligible_players(snapshot, 7)
    }

    #[test]
    fn test_donation_penalty_worst_five_with_tiers() {
        let players: Vec<Player> = ["A", "B", "C", "D", "E", "F", "G"].iter().map(|t| veteran(t)).collect();
        let records = vec![
            donation("A", 0, 1500),
            donation("B", 0, 1000),
            donation("C", 0, 700),
            donation("D", 0, 500),
            donation("E", 0, 499),
            donation("F", 0, 300),
            donation("G", 0, 2000),
        ];
        let snap = snapshot(players, vec![], records);
        let rule = RuleSet::tiered().penalties.donation.unwrap();
        let penalties = donation_penalties(&snap, &rule, &all_eligible(&snap)).unwrap();

        assert_eq!(penalties.get(&PlayerTag::new("G")), Some(&-5));
        assert_eq!(penalties.get(&PlayerTag::new("A")), Some(&-5));
        assert_eq!(penalties.get(&PlayerTag::new("B")), Some(&-5));
        assert_eq!(penalties.get(&PlayerTag::new("C")), Some(&-2));
        assert_eq!(penalties.get(&PlayerTag::new("D")), Some(&-2));
        // Sixth worst and balances above -500 get nothing
        assert!(!penalties.contains_key(&PlayerTag::new("E")));
        assert!(!penalties.contains_key(&PlayerTag::new("F")));
    }

    #[test]
    fn test_war_penalty_per_missed_attack() {
        let war = |tag: &str, war: &str, attacks: i64| {
            record(
                Category::War,
                tag,
                TemporalKey::War(war.to_string()),
                Metrics::new().with(Metric::Stars, attacks * 2).with(Metric::AttacksUsed, attacks),
            )
        };
        let snap = snapshot(
            vec![veteran("A"), veteran("B")],
            vec![],
            vec![war("A", "W1", 2), war("A", "W2", 0), war("B", "W1", 1), war("B", "W2", 2)],
        );
        let rule = RuleSet::tiered().penalties.war.unwrap();
        let penalties = war_penalties(&snap, &rule, &all_eligible(&snap)).unwrap();
        assert_eq!(penalties[&PlayerTag::new("A")], -2);
        assert_eq!(penalties[&PlayerTag::new("B")], -1);
    }

    #[test]
    fn test_capital_penalty_zero_and_low_weekends() {
        let snap = snapshot(
            vec![veteran("Q"), veteran("Z")],
            vec![],
            vec![
                weekend("Q", 5, 12_000),
                weekend("Q", 12, 4_000),
                weekend("Q", 19, 25_000),
                weekend("Z", 5, 0),
                weekend("Z", 12, 9_999),
            ],
        );
        let rule = RuleSet::tiered().penalties.capital.unwrap();
        let penalties = capital_penalties(&snap, &rule, &all_eligible(&snap)).unwrap();
        assert_eq!(penalties[&PlayerTag::new("Q")], -3);
        assert_eq!(penalties[&PlayerTag::new("Z")], -8);
    }

    #[test]
    fn test_cwl_flat_mode() {
        let round = |tag: &str, round: u32, attacks: i64| {
            record(
                Category::Cwl,
                tag,
                TemporalKey::CwlRound { season: "2025-09".to_string(), round },
                Metrics::new().with(Metric::Stars, attacks * 3).with(Metric::AttacksUsed, attacks),
            )
        };
        let snap = snapshot(
            vec![veteran("A"), veteran("B")],
            vec![],
            vec![round("A", 1, 1), round("B", 1, 0), round("A", 2, 1), round("B", 2, 0)],
        );
        let rule = RuleSet::accumulative().penalties.cwl.unwrap();
        let penalties = cwl_penalties(&snap, &rule, &all_eligible(&snap)).unwrap();
        assert_eq!(penalties[&PlayerTag::new("B")], -5);
        assert!(!penalties.contains_key(&PlayerTag::new("A")));
    }

    #[test]
    fn test_clan_games_waits_for_event_start() {
        let games = |tag: &str, points: i64| {
            record(
                Category::ClanGames,
                tag,
                TemporalKey::Month("2025-09".to_string()),
                Metrics::new().with(Metric::ClanGamesPoints, points),
            )
        };
        let baseline = |tag: &str, points: i64| Baseline {
            player_tag: PlayerTag::new(tag),
            donated: 0,
            received: 0,
            clan_games: points,
            baseline_at: start(),
        };
        let rule = RuleSet::tiered().penalties.clan_games.unwrap();

        // Raw counters unchanged since the baseline: nobody has started
        let idle = snapshot(
            vec![veteran("A"), veteran("B")],
            vec![baseline("A", 5000), baseline("B", 800)],
            vec![games("A", 5000), games("B", 800)],
        );
        assert!(clan_games_penalties(&idle, &rule, &all_eligible(&idle)).unwrap().is_empty());

        let started = snapshot(
            vec![veteran("A"), veteran("B"), veteran("C")],
            vec![baseline("A", 5000), baseline("B", 800)],
            vec![games("A", 9000), games("B", 1300)],
        );
        let penalties = clan_games_penalties(&started, &rule, &all_eligible(&started)).unwrap();
        assert!(!penalties.contains_key(&PlayerTag::new("A")));
        assert_eq!(penalties[&PlayerTag::new("B")], -2);
        assert_eq!(penalties[&PlayerTag::new("C")], -5);
    }

    #[test]
    fn test_inactivity_scales_and_caps() {
        let mut idle_five = veteran("A");
        idle_five.last_seen = Some(now() - Duration::days(5));
        let mut idle_month = veteran("B");
        idle_month.last_seen = Some(now() - Duration::days(30));
        let fresh = veteran("C");
        let snap = snapshot(vec![idle_five, idle_month, fresh], vec![], vec![]);
        let rule = RuleSet::tiered().penalties.inactivity.unwrap();
        let penalties = inactivity_penalties(&snap, &rule, &all_eligible(&snap)).unwrap();

        assert_eq!(penalties[&PlayerTag::new("A")], -3);
        assert_eq!(penalties[&PlayerTag::new("B")], -5);
        assert!(!penalties.contains_key(&PlayerTag::new("C")));
    }

    #[test]
    fn test_new_joiners_never_penalized() {
        let mut rookie = veteran("R");
        rookie.joined_at = now() - Duration::days(3);
        rookie.last_seen = Some(now() - Duration::days(3));
        let snap = snapshot(
            vec![rookie],
            vec![],
            vec![donation("R", 0, 5000), weekend("R", 5, 0)],
        );
        let rules = RuleSet::tiered().penalties;
        let eligible = eligible_players(&snap, rules.min_tenure_days);
        assert!(eligible.is_empty());

        assert!(donation_penalties(&snap, rules.donation.as_ref().unwrap(), &eligible).unwrap().is_empty());
        assert!(capital_penalties(&snap, rules.capital.as_ref().unwrap(), &eligible).unwrap().is_empty());
        assert!(inactivity_penalties(&snap, rules.inactivity.as_ref().unwrap(), &eligible).unwrap().is_empty());
    }
}
