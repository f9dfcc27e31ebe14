//! Executes sends. One invariant above all: the external call happens before
//! the row update, and the update is conditional on the link still being
//! unposted, so racing senders and scheduler ticks serialize on the row. A
//! crash between send and update loses the external id but never marks an
//! unsent post as posted.

use std::path::PathBuf;

use chrono::Utc;
use futures::future::join_all;
use rusqlite::params;
use serde::Serialize;

use crate::access;
use crate::error::{AppError, AppResult};
use crate::networks;
use crate::posts;
use crate::providers::{NetworkKind, ProviderError, ProviderRegistry, TokenMap};
use crate::publish::links::{self, PublishLink};
use crate::publish::status::{format_timestamp, TransitionError};
use crate::state::DbPool;
use crate::storage;

/// What happened at one network during a broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkOutcome {
    pub network_id: String,
    pub network_name: String,
    pub external_post_id: Option<String>,
    pub error: Option<String>,
}

/// Aggregate of a broadcast: per-network outcomes plus counts. The HTTP
/// layer returns 200 when anything succeeded and 502 only when everything
/// failed, with this same body either way.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReport {
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<NetworkOutcome>,
}

/// Send a post to one network on behalf of a user. Post-level access is the
/// gate for sending, with a write/admin re-check on the network itself.
pub async fn send_one(
    db: &DbPool,
    providers: &ProviderRegistry,
    post_id: &str,
    network_id: &str,
    user_id: &str,
) -> AppResult<PublishLink> {
    {
        let conn = db.get()?;
        posts::require_post_access(&conn, post_id, user_id)?;
    }

    dispatch_to_network(db, providers, post_id, network_id, Some(user_id)).await?;

    let conn = db.get()?;
    links::load_link(&conn, post_id, network_id)
}

/// Send a post everywhere it is linked and not yet posted. Failures are
/// recorded per network and never abort the loop; sends run concurrently.
pub async fn send_all(
    db: &DbPool,
    providers: &ProviderRegistry,
    post_id: &str,
    user_id: &str,
) -> AppResult<BroadcastReport> {
    let targets: Vec<(String, String)> = {
        let conn = db.get()?;
        posts::require_post_access(&conn, post_id, user_id)?;

        let mut stmt = conn.prepare(
            "SELECT pl.network_id, n.name
             FROM publish_links pl
             JOIN networks n ON n.id = pl.network_id
             WHERE pl.post_id = ?1 AND pl.posted_at IS NULL
             ORDER BY pl.created_at",
        )?;
        let rows = stmt.query_map(params![post_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    if targets.is_empty() {
        return Err(AppError::InvalidState(
            "post has no unposted publish links".into(),
        ));
    }

    let sends = targets.iter().map(|(network_id, _)| {
        dispatch_to_network(db, providers, post_id, network_id, Some(user_id))
    });
    let outcomes = join_all(sends).await;

    let mut report = BroadcastReport {
        success_count: 0,
        error_count: 0,
        results: Vec::with_capacity(targets.len()),
    };
    for ((network_id, network_name), outcome) in targets.into_iter().zip(outcomes) {
        match outcome {
            Ok(external_post_id) => {
                report.success_count += 1;
                report.results.push(NetworkOutcome {
                    network_id,
                    network_name,
                    external_post_id: Some(external_post_id),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(post = post_id, network = %network_id, error = %e, "broadcast send failed");
                report.error_count += 1;
                report.results.push(NetworkOutcome {
                    network_id,
                    network_name,
                    external_post_id: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Ok(report)
}

/// Engagement metrics for an already-posted link, fetched live from the
/// provider. Readable from either side of the link.
pub async fn post_metrics(
    db: &DbPool,
    providers: &ProviderRegistry,
    post_id: &str,
    network_id: &str,
    user_id: &str,
) -> AppResult<serde_json::Value> {
    let (kind, tokens, external_id) = {
        let conn = db.get()?;
        let link = links::get_link(&conn, post_id, network_id, user_id)?;
        let external_id = link
            .status
            .external_id()
            .ok_or_else(|| AppError::InvalidState("link has not been posted yet".into()))?
            .to_string();
        let (kind, tokens) = network_send_context(&conn, network_id)?;
        (kind, tokens, external_id)
    };

    let provider = providers
        .get(kind)
        .ok_or_else(|| AppError::UnsupportedKind(kind.to_string()))?;
    provider
        .metrics(&external_id, &tokens)
        .await
        .map_err(|e| provider_error(kind, e))
}

/// The per-link send used by `send_one`, each broadcast arm, and the
/// scheduler. `acting_user` carries the write/admin re-check; the scheduler
/// passes `None` because a link's existence proves authorization at creation
/// time.
pub(crate) async fn dispatch_to_network(
    db: &DbPool,
    providers: &ProviderRegistry,
    post_id: &str,
    network_id: &str,
    acting_user: Option<&str>,
) -> AppResult<String> {
    // All row reads happen before the provider await; the connection goes
    // back to the pool for the duration of the external call.
    let (link, kind, tokens, text, attachment_paths) = {
        let conn = db.get()?;

        let link = match links::load_link(&conn, post_id, network_id) {
            Ok(link) => link,
            Err(AppError::NotFound) => {
                return Err(AppError::InvalidState(
                    "post is not linked to this network".into(),
                ))
            }
            Err(e) => return Err(e),
        };
        if link.status.is_posted() {
            return Err(TransitionError::AlreadyPosted.into());
        }

        if let Some(user_id) = acting_user {
            if !access::network_permission(&conn, network_id, user_id)?.can_write() {
                return Err(AppError::Forbidden);
            }
        }

        let (kind, tokens) = network_send_context(&conn, network_id)?;

        let text: String = conn.query_row(
            "SELECT body FROM contents WHERE id = ?1",
            params![link.content_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT a.file_path
             FROM publish_attachment_links al
             JOIN attachments a ON a.id = al.attachment_id
             WHERE al.post_id = ?1 AND al.network_id = ?2
             ORDER BY al.created_at",
        )?;
        let paths: Vec<String> = stmt
            .query_map(params![post_id, network_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        (link, kind, tokens, text, paths)
    };

    let provider = providers
        .get(kind)
        .ok_or_else(|| AppError::UnsupportedKind(kind.to_string()))?;
    provider
        .validate_tokens(&tokens)
        .map_err(|e| provider_error(kind, e))?;

    // Files can vanish between attach and send; missing ones just drop out.
    let attachments: Vec<PathBuf> = attachment_paths
        .into_iter()
        .filter(|path| storage::file_exists(path))
        .map(PathBuf::from)
        .collect();

    let external_id = provider
        .send_post(&text, &attachments, &tokens)
        .await
        .map_err(|e| provider_error(kind, e))?
        .ok_or_else(|| {
            AppError::ProviderFailure("provider returned no external post id".into())
        })?;

    let conn = db.get()?;
    let updated = conn.execute(
        "UPDATE publish_links
         SET posted_at = ?2, external_post_id = ?3, scheduled_at = NULL
         WHERE id = ?1 AND posted_at IS NULL",
        params![link.id, format_timestamp(Utc::now()), external_id],
    )?;
    if updated == 0 {
        // Someone else posted this link while our send was in flight. The
        // external network now has a duplicate; the row keeps the winner's id.
        tracing::warn!(
            link = %link.id,
            external_id = %external_id,
            "send race lost, link was posted concurrently"
        );
        return Err(TransitionError::AlreadyPosted.into());
    }

    tracing::info!(post = post_id, network = network_id, external_id = %external_id, "posted");
    Ok(external_id)
}

fn network_send_context(
    conn: &rusqlite::Connection,
    network_id: &str,
) -> AppResult<(NetworkKind, TokenMap)> {
    let network = networks::load_network(conn, network_id)?;
    let kind: NetworkKind = network
        .kind
        .parse()
        .map_err(|_| AppError::UnsupportedKind(network.kind.clone()))?;
    let tokens = networks::load_credentials(conn, network_id)?;
    Ok((kind, tokens))
}

fn provider_error(kind: NetworkKind, e: ProviderError) -> AppError {
    match e {
        ProviderError::MissingTokens(missing) => AppError::ProviderRejected {
            kind: kind.as_str().to_string(),
            missing,
        },
        ProviderError::Failure(msg) => AppError::ProviderFailure(msg),
    }
}
