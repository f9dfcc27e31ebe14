use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::publish::dispatch;
use crate::publish::links::PublishLink;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/publish", post(publish_everywhere))
        .route("/posts/{id}/publish/{network_id}", post(publish_one))
        .route(
            "/posts/{id}/publish/{network_id}/metrics",
            get(link_metrics),
        )
}

/// Broadcast to every unposted link. Partial success is a 200 with the
/// per-network breakdown; only a total failure turns into a 502, carrying
/// the same body.
async fn publish_everywhere(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Response> {
    let report = dispatch::send_all(&state.db, &state.providers, &post_id, &user.id).await?;

    let status = if report.success_count > 0 {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(report)).into_response())
}

async fn publish_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
) -> AppResult<Json<PublishLink>> {
    let link =
        dispatch::send_one(&state.db, &state.providers, &post_id, &network_id, &user.id).await?;
    Ok(Json(link))
}

async fn link_metrics(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let metrics =
        dispatch::post_metrics(&state.db, &state.providers, &post_id, &network_id, &user.id)
            .await?;
    Ok(Json(metrics))
}
