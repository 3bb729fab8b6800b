//! Scoring run: zero, rank, penalize, total, persist

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::leaderboard::{apply_awards, compute_category, ranking};
use crate::models::{PenaltyField, PlayerScore, PlayerTag, SeasonContext};
use crate::penalties::{self, eligible_players, Penalties};
use crate::rules::RuleSet;
use crate::snapshot::SeasonSnapshot;
use crate::store::SeasonStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub awarded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenaltySummary {
    pub field: PenaltyField,
    pub penalized: usize,
}

/// A rule that failed; the rest of the run continued without it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringReport {
    pub season_month: String,
    pub rule_set: String,
    pub rule_set_version: u32,
    pub players_scored: usize,
    pub categories: Vec<CategorySummary>,
    pub penalties: Vec<PenaltySummary>,
    pub failures: Vec<RuleFailure>,
    pub completed_at: DateTime<Utc>,
}

/// Score sheets plus the per-rule bookkeeping of one computation
#[derive(Debug, Clone)]
pub struct ScoredSeason {
    pub scores: BTreeMap<PlayerTag, PlayerScore>,
    pub categories: Vec<CategorySummary>,
    pub penalties: Vec<PenaltySummary>,
    pub failures: Vec<RuleFailure>,
}

pub struct ScoringEngine {
    store: Arc<dyn SeasonStore>,
    rules: RuleSet,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn SeasonStore>, rules: RuleSet) -> Result<Self> {
        rules.validate()?;
        info!("Scoring engine using rule set {} v{}", rules.name, rules.version);
        Ok(Self { store, rules })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Recompute and persist every score of the context's season month
    pub async fn execute(&self, context: &SeasonContext) -> Result<ScoringReport> {
        info!("Scoring season month {} since {}", context.season_month, context.since());
        let snapshot = SeasonSnapshot::load(self.store.as_ref(), context.clone()).await?;
        let scored = self.score(&snapshot);

        let rows: Vec<PlayerScore> = scored.scores.into_values().collect();
        let players_scored = self.store.replace_scores(&context.season_month, &rows).await?;

        if scored.failures.is_empty() {
            info!("Scored {} players for {}", players_scored, context.season_month);
        } else {
            warn!(
                "Scored {} players for {} with {} failed rules",
                players_scored,
                context.season_month,
                scored.failures.len()
            );
        }

        Ok(ScoringReport {
            season_month: context.season_month.clone(),
            rule_set: self.rules.name.clone(),
            rule_set_version: self.rules.version,
            players_scored,
            categories: scored.categories,
            penalties: scored.penalties,
            failures: scored.failures,
            completed_at: Utc::now(),
        })
    }

    /// Pure score computation over a loaded snapshot
    pub fn score(&self, snapshot: &SeasonSnapshot) -> ScoredSeason {
        let context = &snapshot.context;
        let mut scores: BTreeMap<PlayerTag, PlayerScore> = snapshot
            .active_players()
            .map(|p| {
                let sheet = PlayerScore::zeroed(p.player_tag.clone(), &context.season_month, context.now);
                (p.player_tag.clone(), sheet)
            })
            .collect();
        let mut categories = Vec::new();
        let mut failures = Vec::new();

        for rule in &self.rules.categories {
            let outcome = self
                .rules
                .tier(&rule.tier)
                .and_then(|table| compute_category(rule, table, ranking(snapshot, rule.source, &self.rules)));
            match outcome {
                Ok(outcome) => {
                    let awarded = apply_awards(&mut scores, rule, &outcome);
                    categories.push(CategorySummary { name: rule.name.clone(), awarded });
                }
                Err(e) => {
                    warn!("Category {} failed: {}", rule.name, e);
                    failures.push(RuleFailure { rule: rule.name.clone(), message: e.to_string() });
                }
            }
        }

        let penalty_rules = &self.rules.penalties;
        let eligible = eligible_players(snapshot, penalty_rules.min_tenure_days);
        let mut penalties = Vec::new();
        let mut run_penalty = |field: PenaltyField, result: Option<Result<Penalties>>| match result {
            None => {}
            Some(Ok(assigned)) => {
                let penalized = penalties::apply_penalties(&mut scores, field, &assigned);
                penalties.push(PenaltySummary { field, penalized });
            }
            Some(Err(e)) => {
                warn!("Penalty {:?} failed: {}", field, e);
                failures.push(RuleFailure { rule: format!("{field:?}_penalty"), message: e.to_string() });
            }
        };

        run_penalty(
            PenaltyField::Donation,
            penalty_rules.donation.as_ref().map(|r| penalties::donation_penalties(snapshot, r, &eligible)),
        );
        run_penalty(
            PenaltyField::War,
            penalty_rules.war.as_ref().map(|r| penalties::war_penalties(snapshot, r, &eligible)),
        );
        run_penalty(
            PenaltyField::Capital,
            penalty_rules.capital.as_ref().map(|r| penalties::capital_penalties(snapshot, r, &eligible)),
        );
        run_penalty(
            PenaltyField::Cwl,
            penalty_rules.cwl.as_ref().map(|r| penalties::cwl_penalties(snapshot, r, &eligible)),
        );
        run_penalty(
            PenaltyField::ClanGames,
            penalty_rules
                .clan_games
                .as_ref()
                .map(|r| penalties::clan_games_penalties(snapshot, r, &eligible)),
        );
        run_penalty(
            PenaltyField::Inactivity,
            penalty_rules
                .inactivity
                .as_ref()
                .map(|r| penalties::inactivity_penalties(snapshot, r, &eligible)),
        );

        for score in scores.values_mut() {
            score.recompute_totals();
        }

        ScoredSeason { scores, categories, penalties, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{
        Category, Metric, Metrics, Player, RosterMember, SeasonWindow, TelemetryRecord, TemporalKey,
    };
    use crate::rules::{Accumulation, CategoryRule, RankingSource};
    use crate::models::ScoreField;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn context() -> SeasonContext {
        let start = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        SeasonContext::new(
            SeasonWindow { started_at: start, label: "September".to_string() },
            start + Duration::days(14),
        )
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let joined = context().since() - Duration::days(30);
        for tag in ["A", "B", "C"] {
            store
                .insert_player(Player {
                    player_tag: PlayerTag::new(tag),
                    player_name: tag.to_string(),
                    joined_at: joined,
                    last_seen: Some(context().now),
                    is_active: true,
                    updated_at: joined,
                })
                .await;
        }
        let observed = context().since() + Duration::days(3);
        for (tag, stars, attacks) in [("A", 6, 2), ("B", 3, 1), ("C", 0, 0)] {
            store
                .upsert(TelemetryRecord::observed(
                    Category::War,
                    PlayerTag::new(tag),
                    TemporalKey::War("20250904T0800_XYZ".to_string()),
                    observed,
                    Metrics::new().with(Metric::Stars, stars).with(Metric::AttacksUsed, attacks),
                ))
                .await
                .unwrap();
        }
        store
            .upsert(TelemetryRecord::observed(
                Category::CapitalRaid,
                PlayerTag::new("C"),
                TemporalKey::Date(NaiveDate::from_ymd_opt(2025, 9, 5).unwrap()),
                observed,
                Metrics::new().with(Metric::CapitalDestroyed, 0).with(Metric::AttacksUsed, 0),
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_execute_persists_consistent_scores() {
        let store = seeded().await;
        let engine = ScoringEngine::new(store.clone(), RuleSet::tiered()).unwrap();
        let report = engine.execute(&context()).await.unwrap();

        assert_eq!(report.players_scored, 3);
        assert!(report.failures.is_empty());
        let scores = store.scores("2025-09").await.unwrap();
        assert_eq!(scores.len(), 3);
        for score in &scores {
            assert!(score.totals_consistent());
        }

        let a = scores.iter().find(|s| s.player_tag.as_str() == "A").unwrap();
        let c = scores.iter().find(|s| s.player_tag.as_str() == "C").unwrap();
        // A: 1st by stars (15) and 1st by average (5)
        assert_eq!(a.war_points, 20);
        assert_eq!(c.war_penalty, -2);
        assert_eq!(c.capital_penalty, -5);
        assert_eq!(c.total_points, c.category_points() + c.total_penalties);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = seeded().await;
        let engine = ScoringEngine::new(store.clone(), RuleSet::tiered()).unwrap();
        engine.execute(&context()).await.unwrap();
        let first = store.scores("2025-09").await.unwrap();
        engine.execute(&context()).await.unwrap();
        let second = store.scores("2025-09").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_category_does_not_abort_run() {
        let store = seeded().await;
        let mut rules = RuleSet::tiered();
        rules.categories.insert(
            0,
            CategoryRule {
                name: "ghost".to_string(),
                source: RankingSource::WarStars,
                field: ScoreField::War,
                tier: "standard".to_string(),
                slots: 5,
                mode: Accumulation::Add,
            },
        );
        let engine = ScoringEngine::new(store.clone(), rules).unwrap();
        // Break the tier after validation
        let mut broken = engine.rules().clone();
        broken.categories[0].tier = "missing".to_string();
        let engine = ScoringEngine { store: store.clone(), rules: broken };

        let report = engine.execute(&context()).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].rule, "ghost");
        assert_eq!(report.categories.len(), 9);
        let a = store
            .scores("2025-09")
            .await
            .unwrap()
            .into_iter()
            .find(|s| s.player_tag.as_str() == "A")
            .unwrap();
        assert_eq!(a.war_points, 20);
    }

    #[tokio::test]
    async fn test_departed_players_are_not_scored() {
        let store = seeded().await;
        store
            .sync_roster(
                &[
                    RosterMember { player_tag: PlayerTag::new("A"), player_name: "A".to_string() },
                    RosterMember { player_tag: PlayerTag::new("B"), player_name: "B".to_string() },
                ],
                context().now,
            )
            .await
            .unwrap();
        let engine = ScoringEngine::new(store.clone(), RuleSet::tiered()).unwrap();
        let report = engine.execute(&context()).await.unwrap();
        assert_eq!(report.players_scored, 2);
    }
}
