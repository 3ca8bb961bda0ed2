//! Pools: member-curated collections of posts.

use crate::{Node, StoreError};
use arbor_types::EntityKind;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: i64,
    pub member_id: i64,
    pub remote_id: Option<i64>,
    pub name: String,
    /// Whether the pool accepts new posts.
    pub sprung: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewPool {
    pub member_id: i64,
    pub remote_id: Option<i64>,
    pub name: String,
    pub sprung: bool,
}

/// Association of a post with a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPost {
    pub id: i64,
    pub pool_id: i64,
    pub post_id: i64,
    pub created_at: String,
}

const POOL_COLUMNS: &str = "id, member_id, remote_id, name, sprung, created_at";

fn map_row_to_pool(row: &Row) -> rusqlite::Result<Pool> {
    Ok(Pool {
        id: row.get(0)?,
        member_id: row.get(1)?,
        remote_id: row.get(2)?,
        name: row.get(3)?,
        sprung: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_row_to_pool_post(row: &Row) -> rusqlite::Result<PoolPost> {
    Ok(PoolPost {
        id: row.get(0)?,
        pool_id: row.get(1)?,
        post_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

pub fn create_pool(conn: &Connection, pool: &NewPool) -> Result<Pool, StoreError> {
    conn.execute(
        "INSERT INTO pools (member_id, remote_id, name, sprung) VALUES (?1, ?2, ?3, ?4)",
        params![pool.member_id, pool.remote_id, pool.name, pool.sprung],
    )?;
    get_pool(conn, conn.last_insert_rowid())
}

pub fn get_pool(conn: &Connection, id: i64) -> Result<Pool, StoreError> {
    conn.query_row(
        &format!("SELECT {POOL_COLUMNS} FROM pools WHERE id = ?1"),
        [id],
        map_row_to_pool,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(EntityKind::Pool, id))
}

/// Resolves a pool of `member_id` by the identifier `origin` uses for it.
///
/// Pools are containers: a pool that exists but belongs to anyone else is
/// not returned.
pub fn find_member_pool(
    conn: &Connection,
    origin: &Node,
    member_id: i64,
    public_id: i64,
) -> Result<Option<Pool>, StoreError> {
    let column = if origin.is_local { "id" } else { "remote_id" };
    Ok(conn
        .query_row(
            &format!("SELECT {POOL_COLUMNS} FROM pools WHERE {column} = ?1 AND member_id = ?2"),
            params![public_id, member_id],
            map_row_to_pool,
        )
        .optional()?)
}

/// Resolves the pool `origin` knows as `public_id`, whichever of its
/// members owns it.
pub fn find_pool_by_reference(
    conn: &Connection,
    origin: &Node,
    public_id: i64,
) -> Result<Option<Pool>, StoreError> {
    let column = if origin.is_local { "id" } else { "remote_id" };
    Ok(conn
        .query_row(
            &format!(
                "SELECT p.id, p.member_id, p.remote_id, p.name, p.sprung, p.created_at
                 FROM pools p JOIN members m ON m.id = p.member_id
                 WHERE p.{column} = ?1 AND m.node_id = ?2"
            ),
            params![public_id, origin.id],
            map_row_to_pool,
        )
        .optional()?)
}

pub fn list_pools_by_member(conn: &Connection, member_id: i64) -> Result<Vec<Pool>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POOL_COLUMNS} FROM pools WHERE member_id = ?1 ORDER BY name ASC"
    ))?;
    let rows = stmt.query_map([member_id], map_row_to_pool)?;
    let mut pools = Vec::new();
    for row in rows {
        pools.push(row?);
    }
    Ok(pools)
}

pub fn update_pool(
    conn: &Connection,
    id: i64,
    name: &str,
    sprung: bool,
) -> Result<Pool, StoreError> {
    let updated = conn.execute(
        "UPDATE pools SET name = ?1, sprung = ?2 WHERE id = ?3",
        params![name, sprung, id],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found(EntityKind::Pool, id));
    }
    get_pool(conn, id)
}

/// Creates or updates the replica of a pool owned by a member of `origin`.
///
/// `remote_id` names at most one pool for `origin`. If another member of
/// that node already owns it, the pool is reported as not found for
/// `member_id` and nothing is written.
pub fn upsert_remote_pool(
    conn: &Connection,
    origin: &Node,
    member_id: i64,
    remote_id: i64,
    name: &str,
    sprung: bool,
) -> Result<Pool, StoreError> {
    match find_pool_by_reference(conn, origin, remote_id)? {
        Some(existing) if existing.member_id != member_id => {
            Err(StoreError::not_found(EntityKind::Pool, remote_id))
        }
        Some(existing) => update_pool(conn, existing.id, name, sprung),
        None => create_pool(
            conn,
            &NewPool {
                member_id,
                remote_id: Some(remote_id),
                name: name.to_string(),
                sprung,
            },
        ),
    }
}

/// Adds a post to a pool. Returns `false` when the post was already in it.
pub fn add_post_to_pool(conn: &Connection, pool_id: i64, post_id: i64) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pool_posts (pool_id, post_id) VALUES (?1, ?2)",
        params![pool_id, post_id],
    )?;
    Ok(inserted > 0)
}

/// Removes a post from a pool. Returns `false` when it was not in it.
pub fn remove_post_from_pool(
    conn: &Connection,
    pool_id: i64,
    post_id: i64,
) -> Result<bool, StoreError> {
    let removed = conn.execute(
        "DELETE FROM pool_posts WHERE pool_id = ?1 AND post_id = ?2",
        params![pool_id, post_id],
    )?;
    Ok(removed > 0)
}

pub fn list_pool_posts(conn: &Connection, pool_id: i64) -> Result<Vec<PoolPost>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, pool_id, post_id, created_at FROM pool_posts WHERE pool_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([pool_id], map_row_to_pool_post)?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{upsert_remote_post, list_posts_by_member};
    use crate::members::{create_member, MemberProfile};
    use crate::nodes::{ensure_known_node, ensure_local_node};
    use crate::test_support;
    use arbor_types::Visibility;

    #[test]
    fn adding_a_post_twice_keeps_one_membership() {
        let conn = test_support::open();
        let peer = ensure_known_node(&conn, "peer.example", "bb").unwrap();
        let member = create_member(&conn, peer.id, "bo", &MemberProfile::default()).unwrap();
        let pool = upsert_remote_pool(&conn, &peer, member.id, 4, "faves", true).unwrap();
        let post = upsert_remote_post(&conn, &peer, member.id, 9, "hello", Visibility::Forest).unwrap();

        assert!(add_post_to_pool(&conn, pool.id, post.id).unwrap());
        assert!(!add_post_to_pool(&conn, pool.id, post.id).unwrap());
        assert_eq!(list_pool_posts(&conn, pool.id).unwrap().len(), 1);

        assert!(remove_post_from_pool(&conn, pool.id, post.id).unwrap());
        assert!(list_pool_posts(&conn, pool.id).unwrap().is_empty());
        assert_eq!(list_posts_by_member(&conn, member.id).unwrap().len(), 1);
    }

    #[test]
    fn a_remote_pool_id_is_not_reused_by_another_member() {
        let conn = test_support::open();
        let peer = ensure_known_node(&conn, "peer.example", "bb").unwrap();
        let bo = create_member(&conn, peer.id, "bo", &MemberProfile::default()).unwrap();
        let cy = create_member(&conn, peer.id, "cy", &MemberProfile::default()).unwrap();

        let pool = upsert_remote_pool(&conn, &peer, bo.id, 3, "bo's", false).unwrap();
        let err = upsert_remote_pool(&conn, &peer, cy.id, 3, "cy's", true).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Pool, .. }));

        assert!(list_pools_by_member(&conn, cy.id).unwrap().is_empty());
        assert_eq!(find_pool_by_reference(&conn, &peer, 3).unwrap(), Some(pool));
    }

    #[test]
    fn pools_resolve_only_for_their_owner() {
        let conn = test_support::open();
        let home = ensure_local_node(&conn, "home.example", "aa").unwrap();
        let owner = create_member(&conn, home.id, "ana", &MemberProfile::default()).unwrap();
        let other = create_member(&conn, home.id, "eve", &MemberProfile::default()).unwrap();
        let pool = create_pool(
            &conn,
            &NewPool {
                member_id: owner.id,
                remote_id: None,
                name: "reading".into(),
                sprung: false,
            },
        )
        .unwrap();

        assert_eq!(
            find_member_pool(&conn, &home, owner.id, pool.id).unwrap(),
            Some(pool.clone())
        );
        assert!(find_member_pool(&conn, &home, other.id, pool.id).unwrap().is_none());
    }
}
