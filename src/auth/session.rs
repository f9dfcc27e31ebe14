use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::error::AppResult;
use crate::state::DbPool;

/// Open a session for a user and return the bearer token that goes into the
/// cookie. Expiry is stored as RFC3339 UTC so it compares lexicographically
/// like every other timestamp in the schema.
pub fn create_session(pool: &DbPool, user_id: &str, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();
    let expires_at = stamp(Utc::now() + Duration::hours(hours as i64));

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, user_id, token, expires_at],
    )?;

    Ok(token)
}

/// Resolve a token to the (user id, username) pair behind it. Unknown and
/// expired tokens both come back as None; callers decide whether that means
/// a 401.
pub fn user_for_token(pool: &DbPool, token: &str) -> AppResult<Option<(String, String)>> {
    let conn = pool.get()?;

    let user = conn
        .query_row(
            "SELECT u.id, u.username FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = ?1 AND s.expires_at > ?2",
            params![token, stamp(Utc::now())],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(user)
}

/// Drop a session by token. Unknown tokens are a no-op, which lets logout
/// succeed even with a stale cookie.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

fn stamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 32 random bytes, hex-encoded.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
