use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{password, session};
use crate::error::{AppError, AppResult};
use crate::extractors::{session_token_from_headers, CurrentUser};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> AppResult<Response> {
    let username = req.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::BadRequest("username cannot be empty".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let hash = password::hash_password(&req.password)?;
    let user_id = uuid::Uuid::now_v7().to_string();
    {
        let conn = state.db.get()?;
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            params![username],
            |row| row.get(0),
        )?;
        if taken {
            return Err(AppError::BadRequest("username is already taken".into()));
        }
        conn.execute(
            "INSERT INTO users (id, username, password_hash) VALUES (?1, ?2, ?3)",
            params![user_id, username, hash],
        )?;
    }

    tracing::info!(username = %username, "registered user");

    // Registering logs the new user straight in.
    let token = session::create_session(&state.db, &user_id, state.config.auth.session_hours)?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&state, &token))],
        Json(UserResponse {
            id: user_id,
            username,
        }),
    )
        .into_response())
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> AppResult<Response> {
    let user = {
        let conn = state.db.get()?;
        conn.query_row(
            "SELECT id, username, password_hash FROM users WHERE username = ?1",
            params![req.username.trim()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?
    };

    // Same error for unknown user and wrong password.
    let (id, username, hash) = user.ok_or(AppError::Unauthorized)?;
    if !password::verify_password(&req.password, &hash) {
        return Err(AppError::Unauthorized);
    }

    let token = session::create_session(&state.db, &id, state.config.auth.session_hours)?;
    Ok((
        [(header::SET_COOKIE, session_cookie(&state, &token))],
        Json(UserResponse { id, username }),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    if let Some(token) = session_token_from_headers(&headers, &state.config.auth.cookie_name) {
        session::delete_session(&state.db, token)?;
    }

    let clear = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        state.config.auth.cookie_name
    );
    Ok((
        [(header::SET_COOKIE, clear)],
        Json(json!({ "logged_out": true })),
    )
        .into_response())
}

async fn me(user: CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: user.id,
        username: user.username,
    })
}

fn session_cookie(state: &AppState, token: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        state.config.auth.cookie_name,
        token,
        state.config.auth.session_hours * 3600
    )
}
