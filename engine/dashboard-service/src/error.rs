//! Service errors and their REST representation

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

use clash_fetcher::FetchError;
use season_engine::{ResetFailure, SeasonError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Season(#[from] SeasonError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Reset(#[from] ResetFailure),

    #[error("No baseline recorded for player {player_tag}")]
    NoBaseline { player_tag: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub timestamp: String,
}

/// Error detail
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            error: ErrorDetail { code: code.to_string(), message: message.into(), details },
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Season(SeasonError::PlayerNotFound { .. })
            | ServiceError::Season(SeasonError::RecordNotFound { .. })
            | ServiceError::NoBaseline { .. } => StatusCode::NOT_FOUND,
            ServiceError::Season(SeasonError::MalformedRecord { .. })
            | ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Fetch(FetchError::BudgetExceeded { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Fetch(e) if e.is_skippable() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Season(SeasonError::PlayerNotFound { .. }) => "PLAYER_NOT_FOUND",
            ServiceError::Season(SeasonError::RecordNotFound { .. }) => "RECORD_NOT_FOUND",
            ServiceError::Season(SeasonError::MalformedRecord { .. }) => "INVALID_RECORD",
            ServiceError::Season(SeasonError::Database(_)) => "DATABASE_ERROR",
            ServiceError::Season(_) => "SEASON_ERROR",
            ServiceError::Fetch(FetchError::BudgetExceeded { .. }) => "UPDATE_TIMEOUT",
            ServiceError::Fetch(e) if e.is_skippable() => "UPSTREAM_UNAVAILABLE",
            ServiceError::Fetch(_) => "UPDATE_FAILED",
            ServiceError::Reset(_) => "RESET_FAILED",
            ServiceError::NoBaseline { .. } => "NO_BASELINE",
            ServiceError::InvalidRequest { .. } => "INVALID_REQUEST",
        }
    }

    /// Structured body; a failed reset carries the counts of the steps that completed
    pub fn to_response(&self) -> ErrorResponse {
        let details = match self {
            ServiceError::Reset(failure) => serde_json::to_value(&failure.partial).ok(),
            _ => None,
        };
        ErrorResponse::new(self.code(), self.to_string(), details)
    }
}
