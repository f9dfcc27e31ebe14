use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::publish::scheduler::{SchedulerStatus, SweepReport, UpcomingPost};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scheduler/status", get(status))
        .route("/scheduler/check", post(check_now))
        .route("/scheduler/upcoming", get(upcoming))
}

async fn status(State(state): State<AppState>, _user: CurrentUser) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// Run a sweep immediately instead of waiting for the next tick.
async fn check_now(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> AppResult<Json<SweepReport>> {
    let report = state.scheduler.sweep().await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct UpcomingParams {
    pub hours: Option<i64>,
}

async fn upcoming(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<UpcomingParams>,
) -> AppResult<Json<Vec<UpcomingPost>>> {
    Ok(Json(state.scheduler.upcoming(params.hours.unwrap_or(24))?))
}
