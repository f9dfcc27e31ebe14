pub mod auth;
pub mod links;
pub mod networks;
pub mod posts;
pub mod publish;
pub mod scheduler;

use axum::Router;

use crate::state::AppState;

/// The whole HTTP surface, one sub-router per area.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(posts::router())
        .merge(networks::router())
        .merge(links::router())
        .merge(publish::router())
        .merge(scheduler::router())
}
