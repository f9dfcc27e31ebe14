//! Capability resolution over two independent trust domains: who controls a
//! post (creator, editors) and who controls a destination network (owner,
//! grantees). A content item becomes visible or editable to a network party
//! only through an explicit publish link, never through links to other
//! networks.

use rusqlite::{params, Connection};
use serde::Serialize;

/// Effective permission a user holds on a network.
///
/// Ordered so that `>= Write` style comparisons read naturally. The owner
/// holds an implicit `Admin` that supersedes all grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPermission {
    None,
    Read,
    Write,
    Admin,
}

impl NetworkPermission {
    pub fn can_read(self) -> bool {
        self >= NetworkPermission::Read
    }

    pub fn can_write(self) -> bool {
        self >= NetworkPermission::Write
    }
}

/// Delete/unlink rights for one (content, network) pair. The two flags are
/// independent: deleting is a post-owner right, unlinking a network right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRights {
    pub can_delete: bool,
    pub can_unlink: bool,
}

/// True iff the user is the post's creator or a registered editor.
pub fn has_post_access(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1 AND creator_id = ?2)
             OR EXISTS(SELECT 1 FROM post_editors WHERE post_id = ?1 AND editor_id = ?2)",
        params![post_id, user_id],
        |row| row.get(0),
    )
}

/// True iff the user is the post's creator. Editors are not owners.
pub fn is_post_owner(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1 AND creator_id = ?2)",
        params![post_id, user_id],
        |row| row.get(0),
    )
}

/// Resolve the user's effective permission on a network: admin if owner,
/// else the highest grant, else none.
pub fn network_permission(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
) -> Result<NetworkPermission, rusqlite::Error> {
    let is_owner: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM networks WHERE id = ?1 AND owner_id = ?2)",
        params![network_id, user_id],
        |row| row.get(0),
    )?;
    if is_owner {
        return Ok(NetworkPermission::Admin);
    }

    let granted: Option<String> = conn
        .query_row(
            "SELECT permission FROM network_grants
             WHERE network_id = ?1 AND grantee_id = ?2
             ORDER BY CASE permission WHEN 'write' THEN 2 ELSE 1 END DESC
             LIMIT 1",
            params![network_id, user_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(match granted.as_deref() {
        Some("write") => NetworkPermission::Write,
        Some("read") => NetworkPermission::Read,
        _ => NetworkPermission::None,
    })
}

/// View access to a content variant: post access, or a publish link into at
/// least one network the user can read.
pub fn can_view_content(
    conn: &Connection,
    content_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM contents c
             WHERE c.id = ?1
               AND (EXISTS(SELECT 1 FROM posts p WHERE p.id = c.post_id AND p.creator_id = ?2)
                 OR EXISTS(SELECT 1 FROM post_editors e WHERE e.post_id = c.post_id AND e.editor_id = ?2))
         ) OR EXISTS(
             SELECT 1 FROM publish_links pl
             JOIN networks n ON n.id = pl.network_id
             LEFT JOIN network_grants g
                 ON g.network_id = n.id AND g.grantee_id = ?2
             WHERE pl.content_id = ?1
               AND (n.owner_id = ?2 OR g.permission IN ('read', 'write'))
         )",
        params![content_id, user_id],
        |row| row.get(0),
    )
}

/// Edit access to a content variant: post access, or a publish link into at
/// least one network the user can write. Whether an edit mutates in place or
/// forks is decided by the fork engine, not here.
pub fn can_edit_content(
    conn: &Connection,
    content_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM contents c
             WHERE c.id = ?1
               AND (EXISTS(SELECT 1 FROM posts p WHERE p.id = c.post_id AND p.creator_id = ?2)
                 OR EXISTS(SELECT 1 FROM post_editors e WHERE e.post_id = c.post_id AND e.editor_id = ?2))
         ) OR EXISTS(
             SELECT 1 FROM publish_links pl
             JOIN networks n ON n.id = pl.network_id
             LEFT JOIN network_grants g
                 ON g.network_id = n.id AND g.grantee_id = ?2
             WHERE pl.content_id = ?1
               AND (n.owner_id = ?2 OR g.permission = 'write')
         )",
        params![content_id, user_id],
        |row| row.get(0),
    )
}

/// View access to an attachment: post access, or an attachment link into at
/// least one network the user can read.
pub fn can_view_attachment(
    conn: &Connection,
    attachment_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM attachments a
             WHERE a.id = ?1
               AND (EXISTS(SELECT 1 FROM posts p WHERE p.id = a.post_id AND p.creator_id = ?2)
                 OR EXISTS(SELECT 1 FROM post_editors e WHERE e.post_id = a.post_id AND e.editor_id = ?2))
         ) OR EXISTS(
             SELECT 1 FROM publish_attachment_links al
             JOIN networks n ON n.id = al.network_id
             LEFT JOIN network_grants g
                 ON g.network_id = n.id AND g.grantee_id = ?2
             WHERE al.attachment_id = ?1
               AND (n.owner_id = ?2 OR g.permission IN ('read', 'write'))
         )",
        params![attachment_id, user_id],
        |row| row.get(0),
    )
}

/// Resolve delete and unlink rights for one (content, network) pair.
///
/// `can_delete`: post owner only, and only while no publish link for this
/// content anywhere is posted. `can_unlink`: write/admin on that specific
/// network, and the (post, network) link carrying this content not yet
/// posted.
pub fn link_rights(
    conn: &Connection,
    content_id: &str,
    user_id: &str,
    network_id: &str,
) -> Result<LinkRights, rusqlite::Error> {
    let owner: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM contents c
             JOIN posts p ON p.id = c.post_id
             WHERE c.id = ?1 AND p.creator_id = ?2
         )",
        params![content_id, user_id],
        |row| row.get(0),
    )?;

    let any_posted: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM publish_links
             WHERE content_id = ?1 AND posted_at IS NOT NULL
         )",
        params![content_id],
        |row| row.get(0),
    )?;

    let this_link_unposted: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM publish_links
             WHERE content_id = ?1 AND network_id = ?2 AND posted_at IS NULL
         )",
        params![content_id, network_id],
        |row| row.get(0),
    )?;

    let permission = network_permission(conn, network_id, user_id)?;

    Ok(LinkRights {
        can_delete: owner && !any_posted,
        can_unlink: permission.can_write() && this_link_unposted,
    })
}

/// Scheduling right for a (content, network) pair: post access on the owning
/// post, or write/admin on the network.
pub fn can_schedule(
    conn: &Connection,
    content_id: &str,
    network_id: &str,
    user_id: &str,
) -> Result<bool, rusqlite::Error> {
    let post_side: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM contents c
             WHERE c.id = ?1
               AND (EXISTS(SELECT 1 FROM posts p WHERE p.id = c.post_id AND p.creator_id = ?2)
                 OR EXISTS(SELECT 1 FROM post_editors e WHERE e.post_id = c.post_id AND e.editor_id = ?2))
         )",
        params![content_id, user_id],
        |row| row.get(0),
    )?;
    if post_side {
        return Ok(true);
    }

    Ok(network_permission(conn, network_id, user_id)?.can_write())
}
