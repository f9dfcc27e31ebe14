use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::content::{self, EditOutcome};
use crate::db::models::{Attachment, Content, Post};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::posts::{self, PostEditor};
use crate::state::AppState;
use crate::storage;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post).get(list_posts))
        .route("/posts/{id}", get(get_post).delete(delete_post))
        .route("/posts/{id}/editors", get(list_editors))
        .route(
            "/posts/{id}/editors/{editor_id}",
            put(add_editor).delete(remove_editor),
        )
        .route(
            "/posts/{id}/contents",
            post(create_content).get(list_contents),
        )
        .route(
            "/contents/{id}",
            get(get_content).put(edit_content).delete(delete_content),
        )
        .route(
            "/posts/{id}/attachments",
            post(upload_attachments).get(list_attachments),
        )
        .route(
            "/attachments/{id}",
            get(get_attachment).delete(delete_attachment),
        )
        .route("/attachments/{id}/file", get(serve_attachment))
}

async fn create_post(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let post = posts::create_post(&conn, &user.id)?;
    Ok((StatusCode::CREATED, Json(post)).into_response())
}

async fn list_posts(State(state): State<AppState>, user: CurrentUser) -> AppResult<Json<Vec<Post>>> {
    let conn = state.db.get()?;
    Ok(Json(posts::list_posts(&conn, &user.id)?))
}

async fn get_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Post>> {
    let conn = state.db.get()?;
    Ok(Json(posts::get_post(&conn, &post_id, &user.id)?))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    posts::delete_post(&conn, &post_id, &user.id)?;
    Ok(Json(json!({ "deleted": true })))
}

async fn add_editor(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, editor_id)): Path<(String, String)>,
) -> AppResult<Json<Vec<PostEditor>>> {
    let conn = state.db.get()?;
    posts::add_editor(&conn, &post_id, &user.id, &editor_id)?;
    Ok(Json(posts::list_editors(&conn, &post_id, &user.id)?))
}

async fn list_editors(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<PostEditor>>> {
    let conn = state.db.get()?;
    Ok(Json(posts::list_editors(&conn, &post_id, &user.id)?))
}

async fn remove_editor(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, editor_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    posts::remove_editor(&conn, &post_id, &user.id, &editor_id)?;
    Ok(Json(json!({ "removed": true })))
}

#[derive(Deserialize)]
pub struct ContentBodyRequest {
    pub body: String,
}

async fn create_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    Json(req): Json<ContentBodyRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let created = content::create_content(&conn, &post_id, &user.id, &req.body)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn list_contents(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<Content>>> {
    let conn = state.db.get()?;
    posts::require_post_access(&conn, &post_id, &user.id)?;
    Ok(Json(content::list_contents(&conn, &post_id)?))
}

async fn get_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<String>,
) -> AppResult<Json<Content>> {
    let conn = state.db.get()?;
    Ok(Json(content::get_content(&conn, &content_id, &user.id)?))
}

async fn edit_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<String>,
    Json(req): Json<ContentBodyRequest>,
) -> AppResult<Json<EditOutcome>> {
    let conn = state.db.get()?;
    Ok(Json(content::edit_content(
        &conn,
        &content_id,
        &user.id,
        &req.body,
    )?))
}

async fn delete_content(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    content::delete_content(&conn, &content_id, &user.id)?;
    Ok(Json(json!({ "deleted": true })))
}

/// Multipart upload. Every file field becomes one attachment; non-file
/// fields are ignored.
async fn upload_attachments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    {
        let conn = state.db.get()?;
        posts::require_post_access(&conn, &post_id, &user.id)?;
    }

    let mut saved = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("bad multipart body: {e}")))?
    {
        let Some(name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read upload: {e}")))?;
        saved.push(storage::save_upload(&state.uploads_dir, &name, data)?);
    }

    if saved.is_empty() {
        return Err(AppError::BadRequest("no files in upload".into()));
    }

    let conn = state.db.get()?;
    let mut attachments = Vec::with_capacity(saved.len());
    for upload in saved {
        attachments.push(posts::create_attachment(
            &conn,
            &post_id,
            &user.id,
            &upload.file_path,
            upload.content_type.as_deref(),
        )?);
    }
    Ok((StatusCode::CREATED, Json(attachments)).into_response())
}

async fn list_attachments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<Attachment>>> {
    let conn = state.db.get()?;
    Ok(Json(posts::list_attachments(&conn, &post_id, &user.id)?))
}

async fn get_attachment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(attachment_id): Path<String>,
) -> AppResult<Json<Attachment>> {
    let conn = state.db.get()?;
    Ok(Json(posts::get_attachment(&conn, &attachment_id, &user.id)?))
}

async fn serve_attachment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(attachment_id): Path<String>,
) -> AppResult<Response> {
    let attachment = {
        let conn = state.db.get()?;
        posts::get_attachment(&conn, &attachment_id, &user.id)?
    };

    if !storage::file_exists(&attachment.file_path) {
        return Err(AppError::NotFound);
    }
    let bytes = tokio::fs::read(&attachment.file_path).await?;

    let content_type = attachment
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn delete_attachment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(attachment_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    posts::delete_attachment(&conn, &attachment_id, &user.id)?;
    Ok(Json(json!({ "deleted": true })))
}
