//! Error types for the clash fetcher

use season_engine::SeasonError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Access denied by upstream API: {endpoint}")]
    AccessDenied { endpoint: String },

    #[error("Upstream resource not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("Upstream API returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Upstream request timed out: {endpoint}")]
    Timeout { endpoint: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Clan {clan_tag} returned an empty roster")]
    EmptyRoster { clan_tag: String },

    #[error("Missing API credentials: {variable} not set")]
    MissingCredentials { variable: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Update exceeded its {seconds}s budget")]
    BudgetExceeded { seconds: u64 },

    #[error("Store error: {0}")]
    Store(#[from] SeasonError),
}

impl FetchError {
    /// Upstream-unavailable failures: the affected item is skipped, the run continues
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            FetchError::AccessDenied { .. }
                | FetchError::NotFound { .. }
                | FetchError::Status { .. }
                | FetchError::Timeout { .. }
                | FetchError::Http(_)
                | FetchError::EmptyRoster { .. }
        )
    }

    /// Transient failures worth another attempt of the whole update
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Http(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Store(SeasonError::Database(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_failures_are_skippable() {
        assert!(FetchError::AccessDenied { endpoint: "/warlog".to_string() }.is_skippable());
        assert!(FetchError::Status { endpoint: "/players".to_string(), status: 503 }.is_skippable());
        assert!(!FetchError::MissingCredentials { variable: "CLASH_API_KEY".to_string() }.is_skippable());
        assert!(!FetchError::Store(SeasonError::NoSeasonWindow).is_skippable());
    }

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(FetchError::Timeout { endpoint: "/clans".to_string() }.is_retryable());
        assert!(FetchError::Status { endpoint: "/clans".to_string(), status: 503 }.is_retryable());
        assert!(FetchError::Status { endpoint: "/clans".to_string(), status: 429 }.is_retryable());
        assert!(FetchError::Store(SeasonError::Database(sqlx::Error::PoolTimedOut)).is_retryable());

        assert!(!FetchError::Status { endpoint: "/clans".to_string(), status: 404 }.is_retryable());
        assert!(!FetchError::AccessDenied { endpoint: "/clans".to_string() }.is_retryable());
        assert!(!FetchError::EmptyRoster { clan_tag: "2PQ8RYL".to_string() }.is_retryable());
        assert!(!FetchError::MissingCredentials { variable: "CLASH_API_KEY".to_string() }.is_retryable());
        assert!(!FetchError::InvalidConfig { message: "clan tag".to_string() }.is_retryable());
        assert!(!FetchError::BudgetExceeded { seconds: 120 }.is_retryable());
    }
}
