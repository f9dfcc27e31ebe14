//! Publish link records: exactly one per (post, network) pair, carrying the
//! content variant that network receives and the link's publish status.
//! Guards check the state machine before permissions so a posted link answers
//! "already posted" to every caller, owner included.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::access;
use crate::error::{AppError, AppResult};
use crate::networks;
use crate::publish::status::{PublishStatus, TransitionError};

#[derive(Debug, Clone, Serialize)]
pub struct PublishLink {
    pub id: String,
    pub post_id: String,
    pub network_id: String,
    pub content_id: String,
    pub status: PublishStatus,
    pub created_at: String,
}

const LINK_COLUMNS: &str =
    "id, post_id, network_id, content_id, scheduled_at, posted_at, external_post_id, created_at";

struct LinkRow {
    id: String,
    post_id: String,
    network_id: String,
    content_id: String,
    scheduled_at: Option<String>,
    posted_at: Option<String>,
    external_post_id: Option<String>,
    created_at: String,
}

fn read_row(row: &Row) -> rusqlite::Result<LinkRow> {
    Ok(LinkRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        network_id: row.get(2)?,
        content_id: row.get(3)?,
        scheduled_at: row.get(4)?,
        posted_at: row.get(5)?,
        external_post_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl LinkRow {
    fn into_link(self) -> AppResult<PublishLink> {
        let status = PublishStatus::from_columns(
            self.scheduled_at,
            self.posted_at,
            self.external_post_id,
        )?;
        Ok(PublishLink {
            id: self.id,
            post_id: self.post_id,
            network_id: self.network_id,
            content_id: self.content_id,
            status,
            created_at: self.created_at,
        })
    }
}

pub fn load_link(conn: &Connection, post_id: &str, network_id: &str) -> AppResult<PublishLink> {
    conn.query_row(
        &format!("SELECT {LINK_COLUMNS} FROM publish_links WHERE post_id = ?1 AND network_id = ?2"),
        params![post_id, network_id],
        read_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })?
    .into_link()
}

/// Read one link, for anyone on either side of it: post access or read on
/// the network.
pub fn get_link(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    user_id: &str,
) -> AppResult<PublishLink> {
    let link = load_link(conn, post_id, network_id)?;
    let allowed = access::has_post_access(conn, post_id, user_id)?
        || access::network_permission(conn, network_id, user_id)?.can_read();
    if !allowed {
        return Err(AppError::Forbidden);
    }
    Ok(link)
}

/// Link a content variant to a network. Write/admin on the network is the
/// only authority that can aim content at it; post-level access alone is not
/// enough.
pub fn create_link(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    content_id: &str,
    user_id: &str,
) -> AppResult<PublishLink> {
    let post_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        params![post_id],
        |row| row.get(0),
    )?;
    if !post_exists {
        return Err(AppError::NotFound);
    }
    networks::load_network(conn, network_id)?;
    check_content_belongs_to_post(conn, content_id, post_id)?;

    if !access::network_permission(conn, network_id, user_id)?.can_write() {
        return Err(AppError::Forbidden);
    }

    let already_linked: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM publish_links WHERE post_id = ?1 AND network_id = ?2)",
        params![post_id, network_id],
        |row| row.get(0),
    )?;
    if already_linked {
        return Err(AppError::InvalidState(
            "post is already linked to this network".into(),
        ));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let insert = conn.execute(
        "INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES (?1, ?2, ?3, ?4)",
        params![id, post_id, network_id, content_id],
    );
    if let Err(e) = insert {
        // The UNIQUE(post_id, network_id) constraint backstops a racing
        // create that slipped past the check above.
        if let rusqlite::Error::SqliteFailure(f, _) = &e {
            if f.code == rusqlite::ErrorCode::ConstraintViolation {
                return Err(AppError::InvalidState(
                    "post is already linked to this network".into(),
                ));
            }
        }
        return Err(e.into());
    }

    load_link(conn, post_id, network_id)
}

pub fn unlink(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let link = load_link(conn, post_id, network_id)?;
    if link.status.is_posted() {
        return Err(TransitionError::AlreadyPosted.into());
    }
    if !access::network_permission(conn, network_id, user_id)?.can_write() {
        return Err(AppError::Forbidden);
    }

    conn.execute("DELETE FROM publish_links WHERE id = ?1", params![link.id])?;
    Ok(())
}

pub fn schedule_link(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    user_id: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> AppResult<PublishLink> {
    let link = load_link(conn, post_id, network_id)?;
    let new_status = link.status.clone().schedule(at, now)?;

    if !access::can_schedule(conn, &link.content_id, network_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    persist_status(conn, &link.id, &new_status)?;
    // Reload so the response carries the stored second-precision timestamp,
    // not the caller's sub-second one.
    load_link(conn, post_id, network_id)
}

pub fn unschedule_link(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    user_id: &str,
) -> AppResult<PublishLink> {
    let link = load_link(conn, post_id, network_id)?;
    let new_status = link.status.clone().unschedule()?;

    if !access::can_schedule(conn, &link.content_id, network_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    persist_status(conn, &link.id, &new_status)?;
    load_link(conn, post_id, network_id)
}

/// Point the link at a different content variant of the same post. The
/// schedule, if any, stays.
pub fn set_link_content(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    user_id: &str,
    content_id: &str,
) -> AppResult<PublishLink> {
    let link = load_link(conn, post_id, network_id)?;
    if link.status.is_posted() {
        return Err(TransitionError::AlreadyPosted.into());
    }
    check_content_belongs_to_post(conn, content_id, post_id)?;

    if !access::can_schedule(conn, &link.content_id, network_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    conn.execute(
        "UPDATE publish_links SET content_id = ?2 WHERE id = ?1",
        params![link.id, content_id],
    )?;
    load_link(conn, post_id, network_id)
}

/// Mark an attachment to ride along with sends for (post, network).
/// Idempotent; the triple is unique.
pub fn attach_media(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    attachment_id: &str,
    user_id: &str,
) -> AppResult<()> {
    check_attachment_belongs_to_post(conn, attachment_id, post_id)?;
    networks::load_network(conn, network_id)?;
    check_pair_unposted(conn, post_id, network_id)?;

    if !access::has_post_access(conn, post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    conn.execute(
        "INSERT OR IGNORE INTO publish_attachment_links (id, attachment_id, network_id, post_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            uuid::Uuid::now_v7().to_string(),
            attachment_id,
            network_id,
            post_id
        ],
    )?;
    Ok(())
}

pub fn detach_media(
    conn: &Connection,
    post_id: &str,
    network_id: &str,
    attachment_id: &str,
    user_id: &str,
) -> AppResult<()> {
    check_attachment_belongs_to_post(conn, attachment_id, post_id)?;
    check_pair_unposted(conn, post_id, network_id)?;

    if !access::has_post_access(conn, post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    let removed = conn.execute(
        "DELETE FROM publish_attachment_links
         WHERE attachment_id = ?1 AND network_id = ?2 AND post_id = ?3",
        params![attachment_id, network_id, post_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// All links of one post, for people with post access.
pub fn list_links_for_post(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
) -> AppResult<Vec<PublishLink>> {
    let post_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        params![post_id],
        |row| row.get(0),
    )?;
    if !post_exists {
        return Err(AppError::NotFound);
    }
    if !access::has_post_access(conn, post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM publish_links WHERE post_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt.query_map(params![post_id], read_row)?;
    rows.map(|row| row.map_err(AppError::from).and_then(LinkRow::into_link))
        .collect()
}

/// Everything queued at or through one network, newest first, paginated.
/// Readable by anyone with at least read on the network.
pub fn list_links_for_network(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
    limit: Option<u32>,
    offset: Option<u32>,
) -> AppResult<Vec<PublishLink>> {
    networks::load_network(conn, network_id)?;
    if !access::network_permission(conn, network_id, user_id)?.can_read() {
        return Err(AppError::Forbidden);
    }

    let limit = limit.unwrap_or(50).clamp(1, 100);
    let offset = offset.unwrap_or(0);

    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM publish_links WHERE network_id = ?1
         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
    ))?;
    let rows = stmt.query_map(params![network_id, limit, offset], read_row)?;
    rows.map(|row| row.map_err(AppError::from).and_then(LinkRow::into_link))
        .collect()
}

pub(crate) fn persist_status(
    conn: &Connection,
    link_id: &str,
    status: &PublishStatus,
) -> AppResult<()> {
    let (scheduled_at, posted_at, external_post_id) = status.to_columns();
    conn.execute(
        "UPDATE publish_links
         SET scheduled_at = ?2, posted_at = ?3, external_post_id = ?4
         WHERE id = ?1",
        params![link_id, scheduled_at, posted_at, external_post_id],
    )?;
    Ok(())
}

fn check_content_belongs_to_post(
    conn: &Connection,
    content_id: &str,
    post_id: &str,
) -> AppResult<()> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT post_id FROM contents WHERE id = ?1",
            params![content_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(AppError::from(other)),
        })?;
    match owner {
        None => Err(AppError::NotFound),
        Some(owner) if owner != post_id => Err(AppError::BadRequest(
            "content belongs to a different post".into(),
        )),
        Some(_) => Ok(()),
    }
}

fn check_attachment_belongs_to_post(
    conn: &Connection,
    attachment_id: &str,
    post_id: &str,
) -> AppResult<()> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT post_id FROM attachments WHERE id = ?1",
            params![attachment_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(AppError::from(other)),
        })?;
    match owner {
        None => Err(AppError::NotFound),
        Some(owner) if owner != post_id => Err(AppError::BadRequest(
            "attachment belongs to a different post".into(),
        )),
        Some(_) => Ok(()),
    }
}

fn check_pair_unposted(conn: &Connection, post_id: &str, network_id: &str) -> AppResult<()> {
    let posted: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM publish_links
             WHERE post_id = ?1 AND network_id = ?2 AND posted_at IS NOT NULL
         )",
        params![post_id, network_id],
        |row| row.get(0),
    )?;
    if posted {
        return Err(TransitionError::AlreadyPosted.into());
    }
    Ok(())
}
