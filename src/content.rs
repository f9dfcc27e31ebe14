//! Content variants and the fork protocol.
//!
//! An edit by someone with post-level access mutates in place. An edit by a
//! network-side party only mutates in place when they control every linked
//! destination; otherwise the edit forks: the edited text lands on a new
//! content row and only the links for networks the editor controls move over
//! to it. Links to networks the editor cannot touch keep pointing at the
//! original, so copy that other parties approved for their own destinations
//! is never altered underneath them. A posted link pins its content text for
//! everyone.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::access;
use crate::db::models::Content;
use crate::error::{AppError, AppResult};
use crate::posts;

/// What an edit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EditOutcome {
    UpdatedInPlace,
    Forked {
        new_content_id: String,
        moved_networks: Vec<String>,
    },
}

struct LinkedNetwork {
    link_id: String,
    network_id: String,
    posted: bool,
}

/// Create a content variant under a post. Requires post-level access.
pub fn create_content(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
    body: &str,
) -> AppResult<Content> {
    posts::require_post_access(conn, post_id, user_id)?;

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO contents (id, post_id, body) VALUES (?1, ?2, ?3)",
        params![id, post_id, body],
    )?;
    load_content(conn, &id)
}

pub fn load_content(conn: &Connection, content_id: &str) -> AppResult<Content> {
    conn.query_row(
        "SELECT id, post_id, body, created_at, updated_at FROM contents WHERE id = ?1",
        params![content_id],
        |row| {
            Ok(Content {
                id: row.get(0)?,
                post_id: row.get(1)?,
                body: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

/// Read one content variant: post-level access, or read on any network it is
/// linked to.
pub fn get_content(conn: &Connection, content_id: &str, user_id: &str) -> AppResult<Content> {
    let content = load_content(conn, content_id)?;
    if !access::can_view_content(conn, content_id, user_id)? {
        return Err(AppError::Forbidden);
    }
    Ok(content)
}

pub fn list_contents(conn: &Connection, post_id: &str) -> AppResult<Vec<Content>> {
    let mut stmt = conn.prepare(
        "SELECT id, post_id, body, created_at, updated_at FROM contents
         WHERE post_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![post_id], |row| {
        Ok(Content {
            id: row.get(0)?,
            post_id: row.get(1)?,
            body: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Edit a content variant's text on behalf of a user, forking when the user
/// only controls a subset of the linked destinations.
pub fn edit_content(
    conn: &Connection,
    content_id: &str,
    user_id: &str,
    new_body: &str,
) -> AppResult<EditOutcome> {
    let content = load_content(conn, content_id)?;
    let links = linked_networks(conn, content_id)?;
    let any_posted = links.iter().any(|l| l.posted);

    if access::has_post_access(conn, &content.post_id, user_id)? {
        if any_posted {
            return Err(AppError::InvalidState(
                "content has already been posted and can no longer be edited".into(),
            ));
        }
        update_in_place(conn, content_id, new_body)?;
        return Ok(EditOutcome::UpdatedInPlace);
    }

    // Network-side authority: partition the linked destinations by whether
    // the editor can write them. Posted links never move.
    let mut accessible: Vec<&LinkedNetwork> = Vec::new();
    let mut frozen_but_writable = false;
    for link in &links {
        if access::network_permission(conn, &link.network_id, user_id)?.can_write() {
            if link.posted {
                frozen_but_writable = true;
            } else {
                accessible.push(link);
            }
        }
    }

    if accessible.is_empty() {
        // Writable destinations exist but every one of them is posted: the
        // state machine, not permissions, is what blocks this edit.
        if frozen_but_writable {
            return Err(AppError::InvalidState(
                "content has already been posted and can no longer be edited".into(),
            ));
        }
        return Err(AppError::Forbidden);
    }

    if accessible.len() == links.len() {
        // The editor controls every destination, so there is nothing to
        // protect: plain in-place update.
        update_in_place(conn, content_id, new_body)?;
        return Ok(EditOutcome::UpdatedInPlace);
    }

    fork(conn, &content, accessible, new_body)
}

/// Delete a content variant. Post owner only; blocked once any publish link
/// for it is posted. Unposted links to it are removed by cascade.
pub fn delete_content(conn: &Connection, content_id: &str, user_id: &str) -> AppResult<()> {
    let content = load_content(conn, content_id)?;

    if !access::is_post_owner(conn, &content.post_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    let any_posted: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM publish_links WHERE content_id = ?1 AND posted_at IS NOT NULL)",
        params![content_id],
        |row| row.get(0),
    )?;
    if any_posted {
        return Err(AppError::InvalidState(
            "content has a posted publish link and cannot be deleted".into(),
        ));
    }

    conn.execute("DELETE FROM contents WHERE id = ?1", params![content_id])?;
    Ok(())
}

fn linked_networks(conn: &Connection, content_id: &str) -> AppResult<Vec<LinkedNetwork>> {
    let mut stmt = conn.prepare(
        "SELECT id, network_id, posted_at IS NOT NULL FROM publish_links
         WHERE content_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![content_id], |row| {
        Ok(LinkedNetwork {
            link_id: row.get(0)?,
            network_id: row.get(1)?,
            posted: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn update_in_place(conn: &Connection, content_id: &str, new_body: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE contents SET body = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![content_id, new_body],
    )?;
    Ok(())
}

/// Create the forked content row and move the accessible links onto it.
/// Links are deleted and recreated so the (post, network) uniqueness
/// constraint keeps holding throughout; schedules are not preserved, the
/// caller must reschedule against the new variant.
fn fork(
    conn: &Connection,
    original: &Content,
    accessible: Vec<&LinkedNetwork>,
    new_body: &str,
) -> AppResult<EditOutcome> {
    let new_content_id = uuid::Uuid::now_v7().to_string();

    conn.execute("BEGIN IMMEDIATE", [])?;

    let result: AppResult<Vec<String>> = (|| {
        conn.execute(
            "INSERT INTO contents (id, post_id, body) VALUES (?1, ?2, ?3)",
            params![new_content_id, original.post_id, new_body],
        )?;

        let mut moved = Vec::with_capacity(accessible.len());
        for link in &accessible {
            conn.execute(
                "DELETE FROM publish_links WHERE id = ?1",
                params![link.link_id],
            )?;
            conn.execute(
                "INSERT INTO publish_links (id, post_id, network_id, content_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    original.post_id,
                    link.network_id,
                    new_content_id
                ],
            )?;
            moved.push(link.network_id.clone());
        }
        Ok(moved)
    })();

    match result {
        Ok(moved_networks) => {
            conn.execute("COMMIT", [])?;
            tracing::info!(
                content = %original.id,
                new_content = %new_content_id,
                networks = moved_networks.len(),
                "forked content for partial-permission edit"
            );
            Ok(EditOutcome::Forked {
                new_content_id,
                moved_networks,
            })
        }
        Err(e) => {
            conn.execute("ROLLBACK", [])?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::state::DbPool;
    use r2d2::Pool;
    use r2d2_sqlite::SqliteConnectionManager;

    fn test_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        }
        db::run_migrations(&pool).unwrap();
        pool
    }

    fn seed(conn: &Connection, sql: &str) {
        conn.execute_batch(sql).unwrap();
    }

    fn base_fixture(conn: &Connection) {
        seed(
            conn,
            "INSERT INTO users (id, username, password_hash) VALUES
                 ('alice', 'alice', 'x'), ('bob', 'bob', 'x'), ('carol', 'carol', 'x');
             INSERT INTO posts (id, creator_id) VALUES ('p1', 'alice');
             INSERT INTO contents (id, post_id, body) VALUES ('c1', 'p1', 'original');",
        );
    }

    fn link_content(conn: &Connection, link: &str, network: &str, owner: &str) {
        seed(
            conn,
            &format!(
                "INSERT INTO networks (id, owner_id, kind, name)
                     VALUES ('{network}', '{owner}', 'mastodon', '{network}');
                 INSERT INTO publish_links (id, post_id, network_id, content_id)
                     VALUES ('{link}', 'p1', '{network}', 'c1');"
            ),
        );
    }

    #[test]
    fn creator_edits_in_place() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);

        let outcome = edit_content(&conn, "c1", "alice", "edited").unwrap();
        assert_eq!(outcome, EditOutcome::UpdatedInPlace);
        assert_eq!(load_content(&conn, "c1").unwrap().body, "edited");
    }

    #[test]
    fn editor_with_full_network_coverage_edits_in_place() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");
        link_content(&conn, "l2", "n2", "bob");

        // bob owns both destination networks: no fork needed
        let outcome = edit_content(&conn, "c1", "bob", "bob text").unwrap();
        assert_eq!(outcome, EditOutcome::UpdatedInPlace);
        assert_eq!(load_content(&conn, "c1").unwrap().body, "bob text");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM contents", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn partial_access_edit_forks() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        // n1 is bob's, n2 is carol's; bob can only write n1
        link_content(&conn, "l1", "n1", "bob");
        link_content(&conn, "l2", "n2", "carol");

        let outcome = edit_content(&conn, "c1", "bob", "bob text").unwrap();
        let new_content_id = match outcome {
            EditOutcome::Forked {
                new_content_id,
                moved_networks,
            } => {
                assert_eq!(moved_networks, vec!["n1".to_string()]);
                new_content_id
            }
            other => panic!("expected fork, got {:?}", other),
        };

        // The original text survives untouched for carol's network.
        assert_eq!(load_content(&conn, "c1").unwrap().body, "original");
        assert_eq!(load_content(&conn, &new_content_id).unwrap().body, "bob text");

        let n1_target: String = conn
            .query_row(
                "SELECT content_id FROM publish_links WHERE network_id = 'n1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let n2_target: String = conn
            .query_row(
                "SELECT content_id FROM publish_links WHERE network_id = 'n2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n1_target, new_content_id);
        assert_eq!(n2_target, "c1");
    }

    #[test]
    fn fork_drops_schedules_on_moved_links() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");
        link_content(&conn, "l2", "n2", "carol");
        conn.execute(
            "UPDATE publish_links SET scheduled_at = '2030-01-01T00:00:00Z' WHERE id = 'l1'",
            [],
        )
        .unwrap();

        edit_content(&conn, "c1", "bob", "bob text").unwrap();

        let scheduled: Option<String> = conn
            .query_row(
                "SELECT scheduled_at FROM publish_links WHERE network_id = 'n1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(scheduled, None, "moved link must be rescheduled by caller");
    }

    #[test]
    fn stranger_edit_is_forbidden() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");

        let err = edit_content(&conn, "c1", "carol", "sneaky").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        // Unlinked content is unreachable for network-side parties entirely.
        seed(
            &conn,
            "INSERT INTO contents (id, post_id, body) VALUES ('c2', 'p1', 'unlinked');",
        );
        let err = edit_content(&conn, "c2", "bob", "sneaky").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[test]
    fn posted_link_freezes_edits_for_everyone() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");
        conn.execute(
            "UPDATE publish_links SET posted_at = '2026-01-01T00:00:00Z', external_post_id = 'x1'
             WHERE id = 'l1'",
            [],
        )
        .unwrap();

        let err = edit_content(&conn, "c1", "alice", "rewrite history").unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let err = edit_content(&conn, "c1", "bob", "rewrite history").unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn fork_leaves_posted_links_behind() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");
        link_content(&conn, "l2", "n2", "bob");
        conn.execute(
            "UPDATE publish_links SET posted_at = '2026-01-01T00:00:00Z', external_post_id = 'x1'
             WHERE id = 'l2'",
            [],
        )
        .unwrap();

        // bob can write both networks, but n2 already went out: only the
        // unposted n1 link moves to the fork.
        let outcome = edit_content(&conn, "c1", "bob", "take two").unwrap();
        match outcome {
            EditOutcome::Forked { moved_networks, .. } => {
                assert_eq!(moved_networks, vec!["n1".to_string()]);
            }
            other => panic!("expected fork, got {:?}", other),
        }

        let n2_target: String = conn
            .query_row(
                "SELECT content_id FROM publish_links WHERE network_id = 'n2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n2_target, "c1");
    }

    #[test]
    fn delete_requires_owner_and_no_posted_link() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);
        link_content(&conn, "l1", "n1", "bob");

        let err = delete_content(&conn, "c1", "bob").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        conn.execute(
            "UPDATE publish_links SET posted_at = '2026-01-01T00:00:00Z' WHERE id = 'l1'",
            [],
        )
        .unwrap();
        let err = delete_content(&conn, "c1", "alice").unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        conn.execute(
            "UPDATE publish_links SET posted_at = NULL, external_post_id = NULL WHERE id = 'l1'",
            [],
        )
        .unwrap();
        delete_content(&conn, "c1", "alice").unwrap();
        assert!(matches!(
            load_content(&conn, "c1").unwrap_err(),
            AppError::NotFound
        ));

        // The unposted link went with it.
        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM publish_links", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 0);
    }

    #[test]
    fn create_content_requires_post_access() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        base_fixture(&conn);

        let err = create_content(&conn, "p1", "bob", "nope").unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        conn.execute(
            "INSERT INTO post_editors (post_id, editor_id) VALUES ('p1', 'bob')",
            [],
        )
        .unwrap();
        let content = create_content(&conn, "p1", "bob", "variant").unwrap();
        assert_eq!(content.post_id, "p1");
        assert_eq!(list_contents(&conn, "p1").unwrap().len(), 2);

        assert!(matches!(
            create_content(&conn, "missing", "alice", "x").unwrap_err(),
            AppError::NotFound
        ));
    }
}
