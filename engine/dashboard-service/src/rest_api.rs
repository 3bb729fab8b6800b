//! REST API endpoints for the clan dashboard
//!
//! Read endpoints serve the current season's aggregates. Admin endpoints
//! edit single records through the override guard, trigger updates and
//! reset the season; each returns a structured report or an `ErrorResponse`.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use season_engine::views::DonationSort;

use crate::error::{ErrorResponse, ServiceError};
use crate::service::{
    CapitalEdit, ClanGamesEdit, CwlEdit, DashboardService, ReleaseRequest, ResetRequest, WarEdit,
    WeeklyTrophyEdit,
};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Rejection carrying a structured error body
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl warp::reject::Reject for ApiError {}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err.status() {
            status if status.is_server_error() => tracing::error!("Request failed: {}", err),
            _ => tracing::warn!("Request rejected: {}", err),
        }
        Self { status: err.status(), body: err.to_response() }
    }
}

fn reply<T: serde::Serialize>(
    result: crate::error::Result<T>,
) -> Result<warp::reply::Json, warp::Rejection> {
    result
        .map(|value| warp::reply::json(&value))
        .map_err(|e| warp::reject::custom(ApiError::from(e)))
}

#[derive(Debug, Default, Deserialize)]
pub struct DonationParams {
    #[serde(default)]
    pub sort: DonationSort,
}

#[derive(Debug, Default, Deserialize)]
pub struct WeekParams {
    /// Any day of the wanted week, `YYYY-MM-DD`
    #[serde(default)]
    pub week: Option<NaiveDate>,
}

pub async fn get_scoreboard(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.scoreboard().await)
}

pub async fn get_penalties(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.penalties().await)
}

pub async fn get_donations(
    params: DonationParams,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.donations(params.sort).await)
}

pub async fn get_wars(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.wars().await)
}

pub async fn get_capital(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.capital().await)
}

pub async fn get_cwl(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.cwl().await)
}

pub async fn get_events(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.events().await)
}

pub async fn get_weekly_trophies(
    params: WeekParams,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.weekly_trophies(params.week).await)
}

pub async fn edit_war(edit: WarEdit, service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.edit_war(edit).await)
}

pub async fn edit_cwl(edit: CwlEdit, service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.edit_cwl(edit).await)
}

pub async fn delete_cwl_round(
    player_tag: String,
    round: u32,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.delete_cwl_round(&player_tag, round).await)
}

pub async fn edit_capital(
    edit: CapitalEdit,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.edit_capital(edit).await)
}

pub async fn edit_clan_games(
    edit: ClanGamesEdit,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.edit_clan_games(edit).await)
}

pub async fn edit_weekly_trophies(
    edit: WeeklyTrophyEdit,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.edit_weekly_trophies(edit).await)
}

pub async fn release_override(
    request: ReleaseRequest,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.release_override(request).await)
}

pub async fn trigger_update(service: Arc<DashboardService>) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.run_update().await)
}

pub async fn reset_season(
    request: ResetRequest,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.reset(request, false).await)
}

pub async fn reset_season_and_purge(
    request: ResetRequest,
    service: Arc<DashboardService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    reply(service.reset(request, true).await)
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Map rejections to the `ErrorResponse` shape
pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    if let Some(api) = err.find::<ApiError>() {
        return Ok(warp::reply::with_status(warp::reply::json(&api.body), api.status));
    }

    let (status, code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "NOT_FOUND", "No such endpoint".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "Method not allowed".to_string())
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
    };
    let body = ErrorResponse::new(code, message, None);
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}

/// Create REST API routes
pub fn create_routes(
    service: Arc<DashboardService>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let service_filter = warp::any().map(move || service.clone());

    let scoreboard = warp::path("api")
        .and(warp::path("scoreboard"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_scoreboard);

    let penalties = warp::path("api")
        .and(warp::path("penalties"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_penalties);

    let donations = warp::path("api")
        .and(warp::path("donations"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<DonationParams>())
        .and(service_filter.clone())
        .and_then(get_donations);

    let wars = warp::path("api")
        .and(warp::path("wars"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_wars);

    let capital = warp::path("api")
        .and(warp::path("capital"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_capital);

    let cwl = warp::path("api")
        .and(warp::path("cwl"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_cwl);

    let events = warp::path("api")
        .and(warp::path("events"))
        .and(warp::path::end())
        .and(warp::get())
        .and(service_filter.clone())
        .and_then(get_events);

    let weekly_trophies = warp::path("api")
        .and(warp::path("weekly-trophies"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<WeekParams>())
        .and(service_filter.clone())
        .and_then(get_weekly_trophies);

    let war_edit = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("war"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(edit_war);

    let cwl_edit = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("cwl"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(edit_cwl);

    let cwl_delete = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("cwl"))
        .and(warp::path::param::<String>())
        .and(warp::path::param::<u32>())
        .and(warp::path::end())
        .and(warp::delete())
        .and(service_filter.clone())
        .and_then(delete_cwl_round);

    let capital_edit = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("capital"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(edit_capital);

    let clan_games_edit = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("clan-games"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(edit_clan_games);

    let weekly_trophy_edit = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("weekly-trophies"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(edit_weekly_trophies);

    let release = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("release"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(release_override);

    let update = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("update"))
        .and(warp::path::end())
        .and(warp::post())
        .and(service_filter.clone())
        .and_then(trigger_update);

    let reset = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("reset"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter.clone())
        .and_then(reset_season);

    let reset_purge = warp::path("api")
        .and(warp::path("admin"))
        .and(warp::path("reset-purge"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(service_filter)
        .and_then(reset_season_and_purge);

    // Health check endpoint
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    });

    let reads = scoreboard
        .or(penalties)
        .or(donations)
        .or(wars)
        .or(capital)
        .or(cwl)
        .or(events)
        .or(weekly_trophies);
    let edits = war_edit
        .or(cwl_edit)
        .or(cwl_delete)
        .or(capital_edit)
        .or(clan_games_edit)
        .or(weekly_trophy_edit)
        .or(release);
    let commands = update.or(reset).or(reset_purge);

    reads
        .or(edits)
        .or(commands)
        .or(health)
        .recover(handle_rejection)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_headers(vec!["content-type"])
                .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"]),
        )
}
