//! Configuration for the season engine

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::baseline::FirstSightBaseline;
use crate::error::{Result, SeasonError};
use crate::models::SeasonWindow;
use crate::rules::{self, RuleSet};
use crate::season::DeparturePolicy;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Built-in rule set name, ignored when `rules_file` is set
    pub rule_set: String,
    pub rules_file: Option<PathBuf>,
    pub departure_policy: DeparturePolicy,
    pub first_sight_baseline: FirstSightBaseline,
    /// Window start used until the first season reset
    pub season_start: NaiveDate,
}

/// Season engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/clan_dashboard".to_string(),
                max_connections: 10,
            },
            scoring: ScoringConfig::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rule_set: rules::TIERED.to_string(),
            rules_file: None,
            departure_policy: DeparturePolicy::Purge,
            first_sight_baseline: FirstSightBaseline::FirstObserved,
            season_start: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| SeasonError::InvalidConfig {
            message: "DATABASE_URL not set".to_string(),
        })?;

        let mut config = Self::default();
        config.database.url = database_url;

        if let Ok(max) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = max.parse().map_err(|_| SeasonError::InvalidConfig {
                message: format!("DATABASE_MAX_CONNECTIONS is not a number: {max}"),
            })?;
        }
        if let Ok(name) = std::env::var("CLAN_RULE_SET") {
            config.scoring.rule_set = name;
        }
        if let Ok(path) = std::env::var("CLAN_RULES_FILE") {
            config.scoring.rules_file = Some(PathBuf::from(path));
        }
        if let Ok(policy) = std::env::var("CLAN_DEPARTURE_POLICY") {
            config.scoring.departure_policy = parse_departure_policy(&policy)?;
        }
        if let Ok(first_sight) = std::env::var("CLAN_FIRST_SIGHT_BASELINE") {
            config.scoring.first_sight_baseline = parse_first_sight(&first_sight)?;
        }
        if let Ok(start) = std::env::var("CLAN_SEASON_START") {
            config.scoring.season_start = NaiveDate::parse_from_str(&start, "%Y-%m-%d").map_err(|_| {
                SeasonError::InvalidConfig { message: format!("CLAN_SEASON_START is not a date: {start}") }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(SeasonError::InvalidConfig { message: "database url is empty".to_string() });
        }
        if self.database.max_connections == 0 {
            return Err(SeasonError::InvalidConfig {
                message: "database max_connections must be at least 1".to_string(),
            });
        }
        if self.scoring.rules_file.is_none() && self.scoring.rule_set.is_empty() {
            return Err(SeasonError::InvalidConfig { message: "no rule set configured".to_string() });
        }
        Ok(())
    }
}

impl ScoringConfig {
    /// Rule set named by this config, validated
    pub fn load_rules(&self) -> Result<RuleSet> {
        match &self.rules_file {
            Some(path) => RuleSet::from_file(path),
            None => RuleSet::builtin(&self.rule_set),
        }
    }

    pub fn default_window(&self) -> SeasonWindow {
        SeasonWindow {
            started_at: self.season_start.and_time(NaiveTime::MIN).and_utc(),
            label: format!("Season {}", self.season_start.format("%Y-%m-%d")),
        }
    }
}

fn parse_departure_policy(value: &str) -> Result<DeparturePolicy> {
    match value.trim().to_lowercase().as_str() {
        "purge" => Ok(DeparturePolicy::Purge),
        "retain" => Ok(DeparturePolicy::Retain),
        other => Err(SeasonError::InvalidConfig {
            message: format!("CLAN_DEPARTURE_POLICY must be purge or retain, got {other}"),
        }),
    }
}

fn parse_first_sight(value: &str) -> Result<FirstSightBaseline> {
    match value.trim().to_lowercase().as_str() {
        "first_observed" => Ok(FirstSightBaseline::FirstObserved),
        "zero" => Ok(FirstSightBaseline::Zero),
        other => Err(SeasonError::InvalidConfig {
            message: format!("CLAN_FIRST_SIGHT_BASELINE must be first_observed or zero, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_defaults_load_tiered_rules() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        let rules = config.scoring.load_rules().unwrap();
        assert_eq!(rules.name, rules::TIERED);
        assert_eq!(config.scoring.departure_policy, DeparturePolicy::Purge);
    }

    #[test]
    fn test_default_window_starts_at_midnight() {
        let window = ScoringConfig::default().default_window();
        assert_eq!(window.started_at, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
        assert_eq!(window.label, "Season 2025-09-01");
    }

    #[test]
    fn test_unknown_rule_set_is_rejected() {
        let scoring = ScoringConfig { rule_set: "weekly".to_string(), ..ScoringConfig::default() };
        assert!(matches!(scoring.load_rules(), Err(SeasonError::UnknownRuleSet { .. })));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(parse_departure_policy(" Retain ").unwrap(), DeparturePolicy::Retain);
        assert!(parse_departure_policy("archive").is_err());
        assert_eq!(parse_first_sight("zero").unwrap(), FirstSightBaseline::Zero);
    }
}
