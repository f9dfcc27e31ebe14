//! Destination networks: registration, access grants, and the credential
//! store the dispatcher reads tokens from. Credential values are write-only
//! through the API; only names ever come back out.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::access::{self, NetworkPermission};
use crate::db::models::{Network, NetworkGrant};
use crate::error::{AppError, AppResult};
use crate::providers::credentials::CredentialPayload;
use crate::providers::{NetworkKind, TokenMap};

/// Grantable permission levels. Admin is the owner's implicit role and is
/// never stored as a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantLevel {
    Read,
    Write,
}

impl GrantLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantLevel::Read => "read",
            GrantLevel::Write => "write",
        }
    }
}

/// A network row annotated with the caller's effective permission on it.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkWithAccess {
    #[serde(flatten)]
    pub network: Network,
    pub permission: NetworkPermission,
}

pub fn create_network(
    conn: &Connection,
    owner_id: &str,
    kind: &str,
    name: &str,
    note: Option<&str>,
) -> AppResult<Network> {
    let kind: NetworkKind = kind
        .parse()
        .map_err(|_| AppError::BadRequest(format!("unknown network kind: {kind}")))?;
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("network name cannot be empty".into()));
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO networks (id, owner_id, kind, name, note) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, owner_id, kind.as_str(), name, note],
    )?;
    load_network(conn, &id)
}

pub fn load_network(conn: &Connection, network_id: &str) -> AppResult<Network> {
    conn.query_row(
        "SELECT id, owner_id, kind, name, note, created_at FROM networks WHERE id = ?1",
        params![network_id],
        |row| {
            Ok(Network {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                kind: row.get(2)?,
                name: row.get(3)?,
                note: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

/// Fetch a network the caller can at least read, together with their
/// effective permission on it.
pub fn get_network(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
) -> AppResult<NetworkWithAccess> {
    let network = load_network(conn, network_id)?;
    let permission = access::network_permission(conn, network_id, user_id)?;
    if !permission.can_read() {
        return Err(AppError::Forbidden);
    }
    Ok(NetworkWithAccess {
        network,
        permission,
    })
}

/// Every network the user owns or holds a grant on.
pub fn list_networks(conn: &Connection, user_id: &str) -> AppResult<Vec<NetworkWithAccess>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT n.id, n.owner_id, n.kind, n.name, n.note, n.created_at
         FROM networks n
         LEFT JOIN network_grants g ON g.network_id = n.id AND g.grantee_id = ?1
         WHERE n.owner_id = ?1 OR g.grantee_id = ?1
         ORDER BY n.created_at",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Network {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            kind: row.get(2)?,
            name: row.get(3)?,
            note: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    let mut out = Vec::new();
    for network in rows {
        let network = network?;
        let permission = access::network_permission(conn, &network.id, user_id)?;
        out.push(NetworkWithAccess {
            network,
            permission,
        });
    }
    Ok(out)
}

pub fn update_network(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
    name: Option<&str>,
    note: Option<&str>,
) -> AppResult<Network> {
    require_admin(conn, network_id, user_id)?;

    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("network name cannot be empty".into()));
        }
        conn.execute(
            "UPDATE networks SET name = ?2 WHERE id = ?1",
            params![network_id, name],
        )?;
    }
    if let Some(note) = note {
        conn.execute(
            "UPDATE networks SET note = ?2 WHERE id = ?1",
            params![network_id, note],
        )?;
    }
    load_network(conn, network_id)
}

/// Delete a network. Grants, credentials, and publish links into it are
/// removed by cascade; already-posted external posts are not recalled.
pub fn delete_network(conn: &Connection, network_id: &str, user_id: &str) -> AppResult<()> {
    require_admin(conn, network_id, user_id)?;
    conn.execute("DELETE FROM networks WHERE id = ?1", params![network_id])?;
    Ok(())
}

/// Grant or update a user's access to a network. Owner only; re-granting an
/// existing grantee overwrites their level.
pub fn set_grant(
    conn: &Connection,
    network_id: &str,
    granter_id: &str,
    grantee_id: &str,
    level: GrantLevel,
) -> AppResult<NetworkGrant> {
    require_admin(conn, network_id, granter_id)?;

    let grantee_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![grantee_id],
        |row| row.get(0),
    )?;
    if !grantee_exists {
        return Err(AppError::NotFound);
    }
    let is_owner: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM networks WHERE id = ?1 AND owner_id = ?2)",
        params![network_id, grantee_id],
        |row| row.get(0),
    )?;
    if is_owner {
        return Err(AppError::BadRequest(
            "the network owner already holds admin".into(),
        ));
    }

    conn.execute(
        "INSERT INTO network_grants (network_id, grantee_id, granter_id, permission)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(network_id, grantee_id)
         DO UPDATE SET permission = excluded.permission, granter_id = excluded.granter_id",
        params![network_id, grantee_id, granter_id, level.as_str()],
    )?;

    conn.query_row(
        "SELECT network_id, grantee_id, granter_id, permission, created_at
         FROM network_grants WHERE network_id = ?1 AND grantee_id = ?2",
        params![network_id, grantee_id],
        |row| {
            Ok(NetworkGrant {
                network_id: row.get(0)?,
                grantee_id: row.get(1)?,
                granter_id: row.get(2)?,
                permission: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .map_err(AppError::from)
}

/// Revoke a grant. The owner can revoke anyone; a grantee can walk away from
/// their own grant.
pub fn revoke_grant(
    conn: &Connection,
    network_id: &str,
    caller_id: &str,
    grantee_id: &str,
) -> AppResult<()> {
    load_network(conn, network_id)?;
    let is_admin = access::network_permission(conn, network_id, caller_id)?
        == NetworkPermission::Admin;
    if !is_admin && caller_id != grantee_id {
        return Err(AppError::Forbidden);
    }

    let removed = conn.execute(
        "DELETE FROM network_grants WHERE network_id = ?1 AND grantee_id = ?2",
        params![network_id, grantee_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn list_grants(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
) -> AppResult<Vec<NetworkGrant>> {
    require_admin(conn, network_id, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT network_id, grantee_id, granter_id, permission, created_at
         FROM network_grants WHERE network_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![network_id], |row| {
        Ok(NetworkGrant {
            network_id: row.get(0)?,
            grantee_id: row.get(1)?,
            granter_id: row.get(2)?,
            permission: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Store credentials for a network. Fixed kinds replace the whole set so a
/// stale token can never linger next to a fresh one; the custom kind merges
/// key by key, replacing only the names present in the payload.
pub fn set_credentials(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
    payload: &CredentialPayload,
) -> AppResult<()> {
    let network = load_network(conn, network_id)?;
    if access::network_permission(conn, network_id, user_id)? != NetworkPermission::Admin {
        return Err(AppError::Forbidden);
    }
    if payload.kind().as_str() != network.kind {
        return Err(AppError::BadRequest(format!(
            "credential payload is for kind {} but the network is {}",
            payload.kind().as_str(),
            network.kind
        )));
    }
    payload.validate()?;

    conn.execute("BEGIN IMMEDIATE", [])?;
    let result: AppResult<()> = (|| {
        if payload.replaces_existing() {
            conn.execute(
                "DELETE FROM network_credentials WHERE network_id = ?1",
                params![network_id],
            )?;
        }
        for (name, value) in payload.entries() {
            conn.execute(
                "INSERT INTO network_credentials (network_id, name, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(network_id, name) DO UPDATE SET value = excluded.value",
                params![network_id, name, value],
            )?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            conn.execute("ROLLBACK", [])?;
            Err(e)
        }
    }
}

/// Names of the credentials stored for a network. Values never leave the
/// database through this path.
pub fn credential_names(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
) -> AppResult<Vec<String>> {
    load_network(conn, network_id)?;
    if access::network_permission(conn, network_id, user_id)? != NetworkPermission::Admin {
        return Err(AppError::Forbidden);
    }
    let mut stmt = conn.prepare(
        "SELECT name FROM network_credentials WHERE network_id = ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map(params![network_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_credential(
    conn: &Connection,
    network_id: &str,
    user_id: &str,
    name: &str,
) -> AppResult<()> {
    load_network(conn, network_id)?;
    if access::network_permission(conn, network_id, user_id)? != NetworkPermission::Admin {
        return Err(AppError::Forbidden);
    }
    let removed = conn.execute(
        "DELETE FROM network_credentials WHERE network_id = ?1 AND name = ?2",
        params![network_id, name],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

/// Full token map for a network, for the dispatcher. Not permission-gated;
/// callers hold system authority, not a user session.
pub fn load_credentials(conn: &Connection, network_id: &str) -> AppResult<TokenMap> {
    let mut stmt =
        conn.prepare("SELECT name, value FROM network_credentials WHERE network_id = ?1")?;
    let rows = stmt.query_map(params![network_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn require_admin(conn: &Connection, network_id: &str, user_id: &str) -> AppResult<()> {
    load_network(conn, network_id)?;
    if access::network_permission(conn, network_id, user_id)? != NetworkPermission::Admin {
        return Err(AppError::Forbidden);
    }
    Ok(())
}
