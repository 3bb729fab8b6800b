//! Error types for the season engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeasonError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid rule set: {message}")]
    InvalidRuleSet { message: String },

    #[error("Unknown rule set: {name}")]
    UnknownRuleSet { name: String },

    #[error("Malformed {category} record for player {player_tag}: {message}")]
    MalformedRecord { category: String, player_tag: String, message: String },

    #[error("Player not found: {player_tag}")]
    PlayerNotFound { player_tag: String },

    #[error("No {category} record for player {player_tag} at {key}")]
    RecordNotFound { category: String, player_tag: String, key: String },

    #[error("No season window has been opened")]
    NoSeasonWindow,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SeasonError {
    pub fn malformed(
        category: impl ToString,
        player_tag: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedRecord {
            category: category.to_string(),
            player_tag: player_tag.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for SeasonError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig { message: err.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, SeasonError>;
