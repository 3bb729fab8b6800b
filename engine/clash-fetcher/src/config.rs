use serde::{Deserialize, Serialize};
use std::time::Duration;

use season_engine::EngineConfig;

use crate::error::{FetchError, Result};

/// Configuration for the clash fetcher service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Game API configuration
    pub api: ClashApiConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Storage and scoring configuration
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClashApiConfig {
    pub base_url: String,

    /// Name of the environment variable holding the bearer token
    pub token_env: String,

    /// Clan tag without the leading `#`
    pub clan_tag: String,

    pub request_timeout_secs: u64,

    /// Pause between player profile requests
    pub player_pacing_ms: u64,

    /// Pause between CWL war requests
    pub cwl_pacing_ms: u64,

    /// Most recent capital raid seasons processed per run
    pub max_capital_seasons: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable periodic updates
    pub enabled: bool,

    /// Minutes between updates
    pub poll_minutes: u64,

    /// Upper bound for one ingest + score batch
    pub batch_budget_secs: u64,

    /// Retry configuration
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_retries: u32,

    /// Initial retry delay in seconds
    pub initial_delay_secs: u64,

    /// Maximum retry delay in seconds
    pub max_delay_secs: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            api: ClashApiConfig::default(),
            scheduler: SchedulerConfig {
                enabled: true,
                poll_minutes: 60,
                batch_budget_secs: 120,
                retry: RetryConfig {
                    max_retries: 3,
                    initial_delay_secs: 5,
                    max_delay_secs: 300,
                    backoff_multiplier: 2.0,
                },
            },
            engine: EngineConfig::default(),
        }
    }
}

impl Default for ClashApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.clashofclans.com/v1".to_string(),
            token_env: "CLASH_API_KEY".to_string(),
            clan_tag: String::new(),
            request_timeout_secs: 10,
            player_pacing_ms: 100,
            cwl_pacing_ms: 200,
            max_capital_seasons: 10,
        }
    }
}

impl FetcherConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.engine = EngineConfig::from_env()?;

        let clan_tag = std::env::var("CLAN_TAG").map_err(|_| FetchError::InvalidConfig {
            message: "CLAN_TAG not set".to_string(),
        })?;
        config.api.clan_tag = normalize_clan_tag(&clan_tag);

        if let Ok(base_url) = std::env::var("CLASH_API_BASE_URL") {
            config.api.base_url = base_url;
        }
        if let Ok(minutes) = std::env::var("CLAN_POLL_MINUTES") {
            config.scheduler.poll_minutes = minutes.parse().map_err(|_| FetchError::InvalidConfig {
                message: format!("CLAN_POLL_MINUTES is not a number: {minutes}"),
            })?;
        }
        if let Ok(enabled) = std::env::var("CLAN_SCHEDULER_ENABLED") {
            config.scheduler.enabled = enabled == "true" || enabled == "1";
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.clan_tag.is_empty() {
            return Err(FetchError::InvalidConfig { message: "clan tag is empty".to_string() });
        }
        if self.scheduler.poll_minutes == 0 {
            return Err(FetchError::InvalidConfig {
                message: "poll_minutes must be at least 1".to_string(),
            });
        }
        if self.scheduler.retry.max_retries == 0 {
            return Err(FetchError::InvalidConfig {
                message: "retry.max_retries must be at least 1".to_string(),
            });
        }
        self.engine.validate()?;
        Ok(())
    }
}

impl ClashApiConfig {
    /// Get the API token from the environment
    pub fn api_token(&self) -> Result<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| FetchError::MissingCredentials { variable: self.token_env.clone() })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_minutes * 60)
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_secs(self.batch_budget_secs)
    }
}

pub fn normalize_clan_tag(raw: &str) -> String {
    raw.trim().trim_start_matches('#').to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clan_tag_normalization() {
        assert_eq!(normalize_clan_tag(" #2pq8ryl "), "2PQ8RYL");
    }

    #[test]
    fn test_missing_token_is_a_credentials_error() {
        let api = ClashApiConfig {
            token_env: "CLASH_FETCHER_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..ClashApiConfig::default()
        };
        assert!(matches!(api.api_token(), Err(FetchError::MissingCredentials { .. })));
    }

    #[test]
    fn test_defaults_need_a_clan_tag() {
        let mut config = FetcherConfig::default();
        assert!(config.validate().is_err());
        config.api.clan_tag = "2PQ8RYL".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.batch_budget(), Duration::from_secs(120));
    }
}
