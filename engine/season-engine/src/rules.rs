//! Versioned, declarative scoring rule sets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SeasonError};
use crate::models::ScoreField;

pub const TIERED: &str = "tiered";
pub const ACCUMULATIVE: &str = "accumulative";
pub const MONTHLY: &str = "monthly";

/// Rank to points mapping; index 0 is rank 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointTable(Vec<i32>);

impl PointTable {
    pub fn new(points: Vec<i32>) -> Self {
        Self(points)
    }

    pub fn points_for_rank(&self, rank: usize) -> Option<i32> {
        rank.checked_sub(1).and_then(|index| self.0.get(index)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(invalid(format!("tier {name} has no points")));
        }
        if self.0.iter().any(|p| *p <= 0) {
            return Err(invalid(format!("tier {name} must only award positive points")));
        }
        if self.0.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(invalid(format!("tier {name} must be strictly descending")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// Set the score field outright
    Replace,
    /// Add to what the field already holds in this run
    Add,
}

/// Metric a category ranks players by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    DonationsGiven,
    DonationBalance,
    DonationRatio,
    CapitalTotal,
    CapitalAverage,
    WarStars,
    WarAverage,
    Trophies,
    CwlStars,
    ClanGames,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub source: RankingSource,
    pub field: ScoreField,
    pub tier: String,
    pub slots: usize,
    pub mode: Accumulation,
}

/// Penalty applied when a value is at or below a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub at_or_below: i64,
    pub penalty: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationPenaltyRule {
    /// Only the N most negative balances are considered
    pub worst: usize,
    /// Evaluated in order; the first matching threshold applies
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarPenaltyRule {
    pub attacks_per_war: i64,
    pub per_missed_attack: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalPenaltyRule {
    pub zero_weekend: i32,
    pub low_weekend: i32,
    pub minimum_destroyed: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CwlPenaltyMode {
    /// Penalty per missed attack in completed rounds
    PerMissedAttack,
    /// Single penalty if any attack in a completed round was missed
    FlatIfAnyMissed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CwlPenaltyRule {
    pub attacks_per_round: i64,
    pub penalty: i32,
    pub mode: CwlPenaltyMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanGamesPenaltyRule {
    pub zero_points: i32,
    pub low_points: i32,
    pub minimum_points: i64,
}

/// Linear inactivity scale: `start_penalty` at `start_days`, one more point
/// per further day, capped at `max_penalty`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactivityPenaltyRule {
    pub start_days: i64,
    pub start_penalty: i32,
    pub max_penalty: i32,
}

impl InactivityPenaltyRule {
    pub fn penalty_for(&self, days_inactive: i64) -> i32 {
        if days_inactive < self.start_days {
            return 0;
        }
        let extra = (days_inactive - self.start_days).min(i32::MAX as i64) as i32;
        -(self.start_penalty.saturating_add(extra)).min(self.max_penalty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyRules {
    pub min_tenure_days: i64,
    pub donation: Option<DonationPenaltyRule>,
    pub war: Option<WarPenaltyRule>,
    pub capital: Option<CapitalPenaltyRule>,
    pub cwl: Option<CwlPenaltyRule>,
    pub clan_games: Option<ClanGamesPenaltyRule>,
    pub inactivity: Option<InactivityPenaltyRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub version: u32,
    /// Attacks a player gets per regular war, used by the war average
    pub attacks_per_war: i64,
    pub tiers: BTreeMap<String, PointTable>,
    pub categories: Vec<CategoryRule>,
    pub penalties: PenaltyRules,
}

fn invalid(message: String) -> SeasonError {
    SeasonError::InvalidRuleSet { message }
}

fn category(
    name: &str,
    source: RankingSource,
    field: ScoreField,
    tier: &str,
    slots: usize,
    mode: Accumulation,
) -> CategoryRule {
    CategoryRule { name: name.to_string(), source, field, tier: tier.to_string(), slots, mode }
}

impl RuleSet {
    pub fn builtin(name: &str) -> Result<Self> {
        match name {
            TIERED => Ok(Self::tiered()),
            ACCUMULATIVE => Ok(Self::accumulative()),
            MONTHLY => Ok(Self::monthly()),
            other => Err(SeasonError::UnknownRuleSet { name: other.to_string() }),
        }
    }

    /// Load a rule set from a TOML, JSON or YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let rules: RuleSet = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()?;
        rules.validate()?;
        Ok(rules)
    }

    /// Current rules: three tier shapes and the full penalty set
    pub fn tiered() -> Self {
        use Accumulation::{Add, Replace};
        use RankingSource as S;
        use ScoreField as F;

        let tiers = BTreeMap::from([
            (
                "premium".to_string(),
                PointTable::new(vec![30, 27, 24, 21, 19, 17, 15, 13, 11, 9, 7, 5, 4, 3, 2]),
            ),
            ("standard".to_string(), PointTable::new((1..=15).rev().collect())),
            ("low".to_string(), PointTable::new(vec![5, 4, 3, 2, 1])),
        ]);

        Self {
            name: TIERED.to_string(),
            version: 3,
            attacks_per_war: 2,
            tiers,
            categories: vec![
                category("donations_amount", S::DonationsGiven, F::Donation, "low", 5, Replace),
                category("donations_balance", S::DonationBalance, F::Donation, "low", 5, Add),
                category("capital_total", S::CapitalTotal, F::Capital, "standard", 15, Replace),
                category("capital_average", S::CapitalAverage, F::Capital, "low", 5, Add),
                category("war_stars", S::WarStars, F::War, "standard", 15, Replace),
                category("war_average", S::WarAverage, F::War, "low", 5, Add),
                category("trophies", S::Trophies, F::Trophy, "standard", 15, Replace),
                category("cwl_stars", S::CwlStars, F::Cwl, "premium", 15, Replace),
                category("clan_games", S::ClanGames, F::ClanGames, "premium", 15, Replace),
            ],
            penalties: PenaltyRules {
                min_tenure_days: 7,
                donation: Some(DonationPenaltyRule {
                    worst: 5,
                    thresholds: vec![
                        Threshold { at_or_below: -1000, penalty: -5 },
                        Threshold { at_or_below: -500, penalty: -2 },
                    ],
                }),
                war: Some(WarPenaltyRule { attacks_per_war: 2, per_missed_attack: -1 }),
                capital: Some(CapitalPenaltyRule {
                    zero_weekend: -5,
                    low_weekend: -3,
                    minimum_destroyed: 10_000,
                }),
                cwl: Some(CwlPenaltyRule {
                    attacks_per_round: 1,
                    penalty: -8,
                    mode: CwlPenaltyMode::PerMissedAttack,
                }),
                clan_games: Some(ClanGamesPenaltyRule {
                    zero_points: -5,
                    low_points: -2,
                    minimum_points: 1000,
                }),
                inactivity: Some(InactivityPenaltyRule {
                    start_days: 4,
                    start_penalty: 2,
                    max_penalty: 5,
                }),
            },
        }
    }

    /// Second generation: 8-slot normal and premium tiers, lighter penalties
    pub fn accumulative() -> Self {
        use Accumulation::{Add, Replace};
        use RankingSource as S;
        use ScoreField as F;

        let tiers = BTreeMap::from([
            ("normal".to_string(), PointTable::new(vec![10, 8, 6, 5, 4, 3, 2, 1])),
            ("premium".to_string(), PointTable::new(vec![20, 16, 12, 10, 8, 6, 4, 2])),
        ]);

        Self {
            name: ACCUMULATIVE.to_string(),
            version: 2,
            attacks_per_war: 2,
            tiers,
            categories: vec![
                category("donations_amount", S::DonationsGiven, F::Donation, "normal", 8, Replace),
                category("donations_balance", S::DonationBalance, F::Donation, "normal", 8, Add),
                category("capital_total", S::CapitalTotal, F::Capital, "normal", 8, Replace),
                category("capital_average", S::CapitalAverage, F::Capital, "normal", 8, Add),
                category("war_stars", S::WarStars, F::War, "normal", 8, Replace),
                category("war_average", S::WarAverage, F::War, "normal", 8, Add),
                category("trophies", S::Trophies, F::Trophy, "normal", 8, Replace),
                category("cwl_stars", S::CwlStars, F::Cwl, "premium", 8, Replace),
                category("clan_games", S::ClanGames, F::ClanGames, "premium", 8, Replace),
            ],
            penalties: PenaltyRules {
                min_tenure_days: 7,
                donation: Some(DonationPenaltyRule {
                    worst: 5,
                    thresholds: vec![
                        Threshold { at_or_below: -501, penalty: -4 },
                        Threshold { at_or_below: -1, penalty: -2 },
                    ],
                }),
                war: Some(WarPenaltyRule { attacks_per_war: 2, per_missed_attack: -1 }),
                capital: Some(CapitalPenaltyRule {
                    zero_weekend: -2,
                    low_weekend: -1,
                    minimum_destroyed: 10_000,
                }),
                cwl: Some(CwlPenaltyRule {
                    attacks_per_round: 1,
                    penalty: -5,
                    mode: CwlPenaltyMode::FlatIfAnyMissed,
                }),
                clan_games: Some(ClanGamesPenaltyRule {
                    zero_points: -5,
                    low_points: -2,
                    minimum_points: 1000,
                }),
                inactivity: None,
            },
        }
    }

    /// First generation: one 8-slot table for everything, no penalties
    pub fn monthly() -> Self {
        use Accumulation::{Add, Replace};
        use RankingSource as S;
        use ScoreField as F;

        Self {
            name: MONTHLY.to_string(),
            version: 1,
            attacks_per_war: 2,
            tiers: BTreeMap::from([(
                "normal".to_string(),
                PointTable::new(vec![10, 8, 6, 5, 4, 3, 2, 1]),
            )]),
            categories: vec![
                category("donations_amount", S::DonationsGiven, F::Donation, "normal", 8, Replace),
                category("donations_ratio", S::DonationRatio, F::Donation, "normal", 8, Add),
                category("trophies", S::Trophies, F::Trophy, "normal", 8, Replace),
                category("war_stars", S::WarStars, F::War, "normal", 8, Replace),
                category("cwl_stars", S::CwlStars, F::Cwl, "normal", 8, Replace),
                category("capital_average", S::CapitalAverage, F::Capital, "normal", 8, Replace),
            ],
            penalties: PenaltyRules { min_tenure_days: 7, ..PenaltyRules::default() },
        }
    }

    pub fn tier(&self, name: &str) -> Result<&PointTable> {
        self.tiers.get(name).ok_or_else(|| invalid(format!("unknown tier {name}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("rule set needs a name".to_string()));
        }
        if self.attacks_per_war <= 0 {
            return Err(invalid("attacks_per_war must be positive".to_string()));
        }
        for (name, table) in &self.tiers {
            table.validate(name)?;
        }
        for rule in &self.categories {
            self.tier(&rule.tier)?;
            if rule.slots == 0 {
                return Err(invalid(format!("category {} has no slots", rule.name)));
            }
        }
        if let Some(donation) = &self.penalties.donation {
            if donation.thresholds.windows(2).any(|p| p[0].at_or_below > p[1].at_or_below) {
                return Err(invalid("donation thresholds must be ordered most severe first".to_string()));
            }
        }
        if let Some(inactivity) = &self.penalties.inactivity {
            if inactivity.start_penalty > inactivity.max_penalty {
                return Err(invalid("inactivity start penalty exceeds its cap".to_string()));
            }
        }
        Ok(())
    }
}
