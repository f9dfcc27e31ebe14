//! Posts, their co-editors, and their media attachment records. The post row
//! itself is thin; the interesting state lives in content variants and
//! publish links. Editors get the creator's content-mutation rights but never
//! delete rights on the post record.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::access;
use crate::db::models::{Attachment, Post};
use crate::error::{AppError, AppResult};
use crate::storage;

/// One row of a post's editor list, with the username joined in for display.
#[derive(Debug, Clone, Serialize)]
pub struct PostEditor {
    pub editor_id: String,
    pub username: String,
    pub created_at: String,
}

pub fn create_post(conn: &Connection, creator_id: &str) -> AppResult<Post> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO posts (id, creator_id) VALUES (?1, ?2)",
        params![id, creator_id],
    )?;
    load_post(conn, &id)
}

pub fn load_post(conn: &Connection, post_id: &str) -> AppResult<Post> {
    conn.query_row(
        "SELECT id, creator_id, created_at, updated_at FROM posts WHERE id = ?1",
        params![post_id],
        |row| {
            Ok(Post {
                id: row.get(0)?,
                creator_id: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

/// NotFound for a missing post, Forbidden for a user outside its creator and
/// editor circle. The common gate in front of every post-side mutation.
pub fn require_post_access(conn: &Connection, post_id: &str, user_id: &str) -> AppResult<()> {
    load_post(conn, post_id)?;
    if !access::has_post_access(conn, post_id, user_id)? {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn get_post(conn: &Connection, post_id: &str, user_id: &str) -> AppResult<Post> {
    require_post_access(conn, post_id, user_id)?;
    load_post(conn, post_id)
}

/// Posts the user created plus posts they were added to as an editor.
pub fn list_posts(conn: &Connection, user_id: &str) -> AppResult<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT p.id, p.creator_id, p.created_at, p.updated_at
         FROM posts p
         LEFT JOIN post_editors e ON e.post_id = p.id AND e.editor_id = ?1
         WHERE p.creator_id = ?1 OR e.editor_id = ?1
         ORDER BY p.created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Post {
            id: row.get(0)?,
            creator_id: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Delete a post and everything under it: contents, attachments, editors, and
/// publish links go by cascade, stored upload files best-effort afterwards.
/// Creator only; already-posted external posts are not recalled.
pub fn delete_post(conn: &Connection, post_id: &str, user_id: &str) -> AppResult<()> {
    load_post(conn, post_id)?;
    if !access::is_post_owner(conn, post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    let file_paths: Vec<String> = {
        let mut stmt = conn.prepare("SELECT file_path FROM attachments WHERE post_id = ?1")?;
        let rows = stmt.query_map(params![post_id], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };

    conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;

    for path in file_paths {
        storage::delete_file(&path);
    }
    Ok(())
}

/// Add an editor. Creator only; re-adding is a no-op. The creator is not an
/// editor of their own post.
pub fn add_editor(
    conn: &Connection,
    post_id: &str,
    owner_id: &str,
    editor_id: &str,
) -> AppResult<()> {
    let post = load_post(conn, post_id)?;
    if !access::is_post_owner(conn, post_id, owner_id)? {
        return Err(AppError::Forbidden);
    }
    if editor_id == post.creator_id {
        return Err(AppError::BadRequest(
            "the creator already has full access".into(),
        ));
    }
    let editor_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![editor_id],
        |row| row.get(0),
    )?;
    if !editor_exists {
        return Err(AppError::NotFound);
    }

    conn.execute(
        "INSERT OR IGNORE INTO post_editors (post_id, editor_id) VALUES (?1, ?2)",
        params![post_id, editor_id],
    )?;
    Ok(())
}

/// Remove an editor. The creator can remove anyone; an editor may revoke
/// themselves.
pub fn remove_editor(
    conn: &Connection,
    post_id: &str,
    caller_id: &str,
    editor_id: &str,
) -> AppResult<()> {
    load_post(conn, post_id)?;
    let is_owner = access::is_post_owner(conn, post_id, caller_id)?;
    if !is_owner && caller_id != editor_id {
        return Err(AppError::Forbidden);
    }

    let removed = conn.execute(
        "DELETE FROM post_editors WHERE post_id = ?1 AND editor_id = ?2",
        params![post_id, editor_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn list_editors(conn: &Connection, post_id: &str, user_id: &str) -> AppResult<Vec<PostEditor>> {
    require_post_access(conn, post_id, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT e.editor_id, u.username, e.created_at
         FROM post_editors e
         JOIN users u ON u.id = e.editor_id
         WHERE e.post_id = ?1 ORDER BY e.created_at",
    )?;
    let rows = stmt.query_map(params![post_id], |row| {
        Ok(PostEditor {
            editor_id: row.get(0)?,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Record an uploaded file as an attachment of a post. The file itself was
/// already saved by the storage layer.
pub fn create_attachment(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
    file_path: &str,
    content_type: Option<&str>,
) -> AppResult<Attachment> {
    require_post_access(conn, post_id, user_id)?;

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO attachments (id, post_id, file_path, content_type) VALUES (?1, ?2, ?3, ?4)",
        params![id, post_id, file_path, content_type],
    )?;
    load_attachment(conn, &id)
}

pub fn load_attachment(conn: &Connection, attachment_id: &str) -> AppResult<Attachment> {
    conn.query_row(
        "SELECT id, post_id, file_path, content_type, created_at
         FROM attachments WHERE id = ?1",
        params![attachment_id],
        |row| {
            Ok(Attachment {
                id: row.get(0)?,
                post_id: row.get(1)?,
                file_path: row.get(2)?,
                content_type: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

/// Read one attachment record, for anyone with post access or read on a
/// network it is linked to.
pub fn get_attachment(
    conn: &Connection,
    attachment_id: &str,
    user_id: &str,
) -> AppResult<Attachment> {
    let attachment = load_attachment(conn, attachment_id)?;
    if !access::can_view_attachment(conn, attachment_id, user_id)? {
        return Err(AppError::Forbidden);
    }
    Ok(attachment)
}

/// A post's attachments whose files still exist on disk. Existence is checked
/// live on every listing; a vanished file silently drops out, same as it
/// drops out of sends.
pub fn list_attachments(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
) -> AppResult<Vec<Attachment>> {
    require_post_access(conn, post_id, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, post_id, file_path, content_type, created_at
         FROM attachments WHERE post_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![post_id], |row| {
        Ok(Attachment {
            id: row.get(0)?,
            post_id: row.get(1)?,
            file_path: row.get(2)?,
            content_type: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    let all: Vec<Attachment> = rows.collect::<Result<_, _>>()?;
    Ok(all
        .into_iter()
        .filter(|a| storage::file_exists(&a.file_path))
        .collect())
}

/// Delete an attachment record and its stored file. Post owner only, and only
/// while the owning post has no posted publish link anywhere.
pub fn delete_attachment(
    conn: &Connection,
    attachment_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let attachment = load_attachment(conn, attachment_id)?;
    if !access::is_post_owner(conn, &attachment.post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    let post_has_posted: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM publish_links WHERE post_id = ?1 AND posted_at IS NOT NULL
         )",
        params![attachment.post_id],
        |row| row.get(0),
    )?;
    if post_has_posted {
        return Err(AppError::InvalidState(
            "post has a posted publish link; its attachments are frozen".into(),
        ));
    }

    conn.execute(
        "DELETE FROM attachments WHERE id = ?1",
        params![attachment_id],
    )?;
    storage::delete_file(&attachment.file_path);
    Ok(())
}
