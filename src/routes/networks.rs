use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{Network, NetworkGrant};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::networks::{self, GrantLevel, NetworkWithAccess};
use crate::providers::credentials::CredentialPayload;
use crate::providers::NetworkKind;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/networks", post(create_network).get(list_networks))
        .route("/networks/kinds", get(list_kinds))
        .route(
            "/networks/{id}",
            get(get_network).put(update_network).delete(delete_network),
        )
        .route("/networks/{id}/grants", get(list_grants))
        .route(
            "/networks/{id}/grants/{user_id}",
            put(set_grant).delete(revoke_grant),
        )
        .route(
            "/networks/{id}/credentials",
            put(set_credentials).get(list_credentials),
        )
        .route(
            "/networks/{id}/credentials/{name}",
            delete(delete_credential),
        )
}

#[derive(Deserialize)]
pub struct CreateNetworkRequest {
    pub kind: String,
    pub name: String,
    pub note: Option<String>,
}

async fn create_network(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateNetworkRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let network =
        networks::create_network(&conn, &user.id, &req.kind, &req.name, req.note.as_deref())?;
    Ok((StatusCode::CREATED, Json(network)).into_response())
}

async fn list_networks(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<NetworkWithAccess>>> {
    let conn = state.db.get()?;
    Ok(Json(networks::list_networks(&conn, &user.id)?))
}

/// Every kind the schema accepts, and the subset this deployment can
/// actually send to.
async fn list_kinds(State(state): State<AppState>, _user: CurrentUser) -> Json<serde_json::Value> {
    let all: Vec<&str> = NetworkKind::ALL.iter().map(|k| k.as_str()).collect();
    let supported: Vec<&str> = state
        .providers
        .supported_kinds()
        .into_iter()
        .map(|k| k.as_str())
        .collect();
    Json(json!({ "all": all, "supported": supported }))
}

async fn get_network(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
) -> AppResult<Json<NetworkWithAccess>> {
    let conn = state.db.get()?;
    Ok(Json(networks::get_network(&conn, &network_id, &user.id)?))
}

#[derive(Deserialize)]
pub struct UpdateNetworkRequest {
    pub name: Option<String>,
    pub note: Option<String>,
}

async fn update_network(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
    Json(req): Json<UpdateNetworkRequest>,
) -> AppResult<Json<Network>> {
    let conn = state.db.get()?;
    Ok(Json(networks::update_network(
        &conn,
        &network_id,
        &user.id,
        req.name.as_deref(),
        req.note.as_deref(),
    )?))
}

async fn delete_network(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    networks::delete_network(&conn, &network_id, &user.id)?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Deserialize)]
pub struct GrantRequest {
    pub permission: GrantLevel,
}

async fn set_grant(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((network_id, grantee_id)): Path<(String, String)>,
    Json(req): Json<GrantRequest>,
) -> AppResult<Json<NetworkGrant>> {
    let conn = state.db.get()?;
    Ok(Json(networks::set_grant(
        &conn,
        &network_id,
        &user.id,
        &grantee_id,
        req.permission,
    )?))
}

async fn list_grants(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
) -> AppResult<Json<Vec<NetworkGrant>>> {
    let conn = state.db.get()?;
    Ok(Json(networks::list_grants(&conn, &network_id, &user.id)?))
}

async fn revoke_grant(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((network_id, grantee_id)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    networks::revoke_grant(&conn, &network_id, &user.id, &grantee_id)?;
    Ok(Json(json!({ "revoked": true })))
}

async fn set_credentials(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
    Json(payload): Json<CredentialPayload>,
) -> AppResult<Json<Vec<String>>> {
    let conn = state.db.get()?;
    networks::set_credentials(&conn, &network_id, &user.id, &payload)?;
    Ok(Json(networks::credential_names(&conn, &network_id, &user.id)?))
}

/// Names only; values never leave the database through the API.
async fn list_credentials(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(network_id): Path<String>,
) -> AppResult<Json<Vec<String>>> {
    let conn = state.db.get()?;
    Ok(Json(networks::credential_names(&conn, &network_id, &user.id)?))
}

async fn delete_credential(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((network_id, name)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    networks::delete_credential(&conn, &network_id, &user.id, &name)?;
    Ok(Json(json!({ "deleted": true })))
}
