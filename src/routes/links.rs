use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::publish::links::{self, PublishLink};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts/{id}/links", post(create_link).get(list_for_post))
        .route(
            "/posts/{id}/links/{network_id}",
            get(get_link).delete(unlink),
        )
        .route("/posts/{id}/links/{network_id}/content", put(set_content))
        .route(
            "/posts/{id}/links/{network_id}/schedule",
            put(schedule).delete(unschedule),
        )
        .route(
            "/posts/{id}/links/{network_id}/attachments/{attachment_id}",
            put(attach_media).delete(detach_media),
        )
        .route("/networks/{id}/links", get(list_for_network))
}

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    pub network_id: String,
    pub content_id: String,
}

async fn create_link(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    Json(req): Json<CreateLinkRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let link = links::create_link(&conn, &post_id, &req.network_id, &req.content_id, &user.id)?;
    Ok((StatusCode::CREATED, Json(link)).into_response())
}

async fn list_for_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<PublishLink>>> {
    let conn = state.db.get()?;
    Ok(Json(links::list_links_for_post(&conn, &post_id, &user.id)?))
}

#[derive(Deserialize)]
pub struct PageParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn list_for_network(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
    Query(page): Query<PageParams>,
) -> AppResult<Json<Vec<PublishLink>>> {
    let conn = state.db.get()?;
    Ok(Json(links::list_links_for_network(
        &conn,
        &network_id,
        &user.id,
        page.limit,
        page.offset,
    )?))
}

async fn get_link(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
) -> AppResult<Json<PublishLink>> {
    let conn = state.db.get()?;
    Ok(Json(links::get_link(&conn, &post_id, &network_id, &user.id)?))
}

async fn unlink(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    links::unlink(&conn, &post_id, &network_id, &user.id)?;
    Ok(Json(json!({ "unlinked": true })))
}

#[derive(Deserialize)]
pub struct SetContentRequest {
    pub content_id: String,
}

async fn set_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
    Json(req): Json<SetContentRequest>,
) -> AppResult<Json<PublishLink>> {
    let conn = state.db.get()?;
    Ok(Json(links::set_link_content(
        &conn,
        &post_id,
        &network_id,
        &user.id,
        &req.content_id,
    )?))
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub at: String,
}

async fn schedule(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
    Json(req): Json<ScheduleRequest>,
) -> AppResult<Json<PublishLink>> {
    let at: DateTime<Utc> = DateTime::parse_from_rfc3339(&req.at)
        .map_err(|e| AppError::BadRequest(format!("bad timestamp {:?}: {e}", req.at)))?
        .with_timezone(&Utc);

    let conn = state.db.get()?;
    Ok(Json(links::schedule_link(
        &conn,
        &post_id,
        &network_id,
        &user.id,
        at,
        Utc::now(),
    )?))
}

async fn unschedule(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id)): Path<(String, String)>,
) -> AppResult<Json<PublishLink>> {
    let conn = state.db.get()?;
    Ok(Json(links::unschedule_link(
        &conn,
        &post_id,
        &network_id,
        &user.id,
    )?))
}

async fn attach_media(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id, attachment_id)): Path<(String, String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    links::attach_media(&conn, &post_id, &network_id, &attachment_id, &user.id)?;
    Ok(Json(json!({ "attached": true })))
}

async fn detach_media(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, network_id, attachment_id)): Path<(String, String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    links::detach_media(&conn, &post_id, &network_id, &attachment_id, &user.id)?;
    Ok(Json(json!({ "detached": true })))
}
