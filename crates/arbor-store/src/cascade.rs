//! Cascading, all-or-nothing deletion.
//!
//! Deleting an entity removes every row that exists only because it belongs
//! to that entity:
//!
//! - a remote node owns its members;
//! - an account owns its member;
//! - a member owns the posts, comments, likes and pools it authored;
//! - a post owns the likes and pool memberships that point at it;
//! - a pool owns its pool memberships.
//!
//! Rows authored by a surviving member are never removed, even when they
//! point into the deleted subtree. A surviving comment on a deleted post is
//! detached (`post_id` set to NULL) with its author and text untouched.
//!
//! The plan is computed and executed inside one savepoint. If any statement
//! fails the savepoint is rolled back and the store is exactly as it was.

use crate::{content, members, nodes, pools, StoreError};
use arbor_types::EntityKind;
use rusqlite::{Connection, Params};
use std::collections::{BTreeMap, BTreeSet};

/// Root of a cascading delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Node(i64),
    Account(i64),
    Member(i64),
    Post(i64),
    Comment(i64),
    Like(i64),
    Pool(i64),
}

impl EntityRef {
    pub fn kind(self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Account(_) => EntityKind::Account,
            Self::Member(_) => EntityKind::Member,
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
            Self::Like(_) => EntityKind::Like,
            Self::Pool(_) => EntityKind::Pool,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Node(id)
            | Self::Account(id)
            | Self::Member(id)
            | Self::Post(id)
            | Self::Comment(id)
            | Self::Like(id)
            | Self::Pool(id) => id,
        }
    }
}

/// What a completed cascade removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    removed: BTreeMap<EntityKind, usize>,
    /// Comments by surviving members whose post was removed.
    pub detached_comments: usize,
}

impl CascadeReport {
    /// Number of rows of `kind` removed.
    pub fn removed(&self, kind: EntityKind) -> usize {
        self.removed.get(&kind).copied().unwrap_or(0)
    }

    /// Total number of rows removed.
    pub fn total(&self) -> usize {
        self.removed.values().sum()
    }
}

#[derive(Debug, Default)]
struct CascadePlan {
    nodes: BTreeSet<i64>,
    accounts: BTreeSet<i64>,
    members: BTreeSet<i64>,
    posts: BTreeSet<i64>,
    comments: BTreeSet<i64>,
    likes: BTreeSet<i64>,
    pools: BTreeSet<i64>,
    pool_posts: BTreeSet<i64>,
    detached: BTreeSet<i64>,
}

/// Deletes `root` and everything it owns, atomically.
///
/// # Errors
///
/// - `StoreError::NotFound` if `root` does not exist.
/// - `StoreError::LocalNode` if `root` is the node describing this tree.
/// - `StoreError::Transaction` if a statement fails part way; nothing is
///   deleted in that case.
pub fn delete_cascade(conn: &mut Connection, root: EntityRef) -> Result<CascadeReport, StoreError> {
    let sp = conn.savepoint()?;
    let plan = plan_cascade(&sp, root)?;
    let report = match execute_plan(&sp, &plan) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(
                entity = %root.kind(),
                id = root.id(),
                "cascade delete rolled back: {}",
                e
            );
            return Err(e);
        }
    };
    sp.commit().map_err(|source| StoreError::Transaction {
        entity: root.kind(),
        source,
    })?;

    tracing::info!(
        entity = %root.kind(),
        id = root.id(),
        removed = report.total(),
        detached = report.detached_comments,
        "cascade delete committed"
    );
    Ok(report)
}

fn ids<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn plan_cascade(conn: &Connection, root: EntityRef) -> Result<CascadePlan, StoreError> {
    let mut plan = CascadePlan::default();

    match root {
        EntityRef::Node(id) => {
            if nodes::get_node(conn, id)?.is_local {
                return Err(StoreError::LocalNode);
            }
            plan.nodes.insert(id);
            plan.members
                .extend(ids(conn, "SELECT id FROM members WHERE node_id = ?1", [id])?);
        }
        EntityRef::Account(id) => {
            let account = members::get_account(conn, id)?;
            plan.accounts.insert(id);
            plan.members.insert(account.member_id);
        }
        EntityRef::Member(id) => {
            members::get_member(conn, id)?;
            plan.members.insert(id);
        }
        EntityRef::Post(id) => {
            content::get_post(conn, id)?;
            plan.posts.insert(id);
        }
        EntityRef::Comment(id) => {
            content::get_comment(conn, id)?;
            plan.comments.insert(id);
        }
        EntityRef::Like(id) => {
            content::find_like(conn, id)?
                .ok_or_else(|| StoreError::not_found(EntityKind::Like, id))?;
            plan.likes.insert(id);
        }
        EntityRef::Pool(id) => {
            pools::get_pool(conn, id)?;
            plan.pools.insert(id);
        }
    }

    for &member_id in &plan.members {
        plan.accounts.extend(ids(
            conn,
            "SELECT id FROM accounts WHERE member_id = ?1",
            [member_id],
        )?);
        plan.posts
            .extend(ids(conn, "SELECT id FROM posts WHERE member_id = ?1", [member_id])?);
        plan.comments.extend(ids(
            conn,
            "SELECT id FROM comments WHERE member_id = ?1",
            [member_id],
        )?);
        plan.likes.extend(ids(
            conn,
            "SELECT id FROM post_likes WHERE member_id = ?1",
            [member_id],
        )?);
        plan.pools
            .extend(ids(conn, "SELECT id FROM pools WHERE member_id = ?1", [member_id])?);
    }

    for &post_id in &plan.posts {
        plan.likes.extend(ids(
            conn,
            "SELECT id FROM post_likes WHERE post_id = ?1",
            [post_id],
        )?);
        plan.pool_posts.extend(ids(
            conn,
            "SELECT id FROM pool_posts WHERE post_id = ?1",
            [post_id],
        )?);
        for comment_id in ids(conn, "SELECT id FROM comments WHERE post_id = ?1", [post_id])? {
            if !plan.comments.contains(&comment_id) {
                plan.detached.insert(comment_id);
            }
        }
    }

    for &pool_id in &plan.pools {
        plan.pool_posts.extend(ids(
            conn,
            "SELECT id FROM pool_posts WHERE pool_id = ?1",
            [pool_id],
        )?);
    }

    Ok(plan)
}

fn delete_rows(
    conn: &Connection,
    kind: EntityKind,
    table: &str,
    rows: &BTreeSet<i64>,
    report: &mut CascadeReport,
) -> Result<(), StoreError> {
    let failed = |source: rusqlite::Error| StoreError::Transaction {
        entity: kind,
        source,
    };
    let mut stmt = conn
        .prepare_cached(&format!("DELETE FROM {table} WHERE id = ?1"))
        .map_err(failed)?;
    let mut removed = 0;
    for id in rows {
        removed += stmt.execute([id]).map_err(failed)?;
    }
    if removed > 0 {
        *report.removed.entry(kind).or_default() += removed;
    }
    Ok(())
}

// Children before parents, so every statement satisfies the foreign keys.
fn execute_plan(conn: &Connection, plan: &CascadePlan) -> Result<CascadeReport, StoreError> {
    let mut report = CascadeReport::default();

    delete_rows(conn, EntityKind::PoolPost, "pool_posts", &plan.pool_posts, &mut report)?;
    delete_rows(conn, EntityKind::Like, "post_likes", &plan.likes, &mut report)?;
    delete_rows(conn, EntityKind::Comment, "comments", &plan.comments, &mut report)?;

    for id in &plan.detached {
        report.detached_comments += conn
            .execute("UPDATE comments SET post_id = NULL WHERE id = ?1", [id])
            .map_err(|source| StoreError::Transaction {
                entity: EntityKind::Comment,
                source,
            })?;
    }

    delete_rows(conn, EntityKind::Post, "posts", &plan.posts, &mut report)?;
    delete_rows(conn, EntityKind::Pool, "pools", &plan.pools, &mut report)?;
    delete_rows(conn, EntityKind::Account, "accounts", &plan.accounts, &mut report)?;
    delete_rows(conn, EntityKind::Member, "members", &plan.members, &mut report)?;
    delete_rows(conn, EntityKind::Node, "nodes", &plan.nodes, &mut report)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{create_comment, create_post, get_comment, find_post, upsert_like};
    use crate::members::{create_member, MemberProfile};
    use crate::nodes::{ensure_known_node, ensure_local_node, find_node_by_domain};
    use crate::pools::{add_post_to_pool, create_pool, list_pool_posts};
    use crate::test_support;
    use crate::{NewComment, NewPool, NewPost};
    use arbor_types::Visibility;

    fn post(conn: &Connection, member_id: i64, text: &str) -> i64 {
        create_post(
            conn,
            &NewPost {
                member_id,
                remote_id: None,
                text: text.into(),
                visibility: Visibility::Forest,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn deleting_a_post_detaches_foreign_comments_and_drops_edges() {
        let mut conn = test_support::open();
        let home = ensure_local_node(&conn, "home.example", "aa").unwrap();
        let author = create_member(&conn, home.id, "ana", &MemberProfile::default()).unwrap();
        let reader = create_member(&conn, home.id, "bo", &MemberProfile::default()).unwrap();
        let post_id = post(&conn, author.id, "hello");

        let comment = create_comment(
            &conn,
            &NewComment {
                member_id: reader.id,
                post_id,
                remote_id: None,
                text: "nice".into(),
            },
        )
        .unwrap();
        upsert_like(&conn, reader.id, post_id, None).unwrap();
        let pool = create_pool(
            &conn,
            &NewPool {
                member_id: reader.id,
                remote_id: None,
                name: "saved".into(),
                sprung: true,
            },
        )
        .unwrap();
        add_post_to_pool(&conn, pool.id, post_id).unwrap();

        let report = delete_cascade(&mut conn, EntityRef::Post(post_id)).unwrap();

        assert_eq!(report.removed(EntityKind::Post), 1);
        assert_eq!(report.removed(EntityKind::Like), 1);
        assert_eq!(report.removed(EntityKind::PoolPost), 1);
        assert_eq!(report.removed(EntityKind::Comment), 0);
        assert_eq!(report.detached_comments, 1);

        let survivor = get_comment(&conn, comment.id).unwrap();
        assert_eq!(survivor.post_id, None);
        assert_eq!(survivor.text, "nice");
        assert!(list_pool_posts(&conn, pool.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_remote_node_removes_its_members_and_content() {
        let mut conn = test_support::open();
        let home = ensure_local_node(&conn, "home.example", "aa").unwrap();
        let peer = ensure_known_node(&conn, "peer.example", "bb").unwrap();
        let remote = create_member(&conn, peer.id, "zed", &MemberProfile::default()).unwrap();
        let local = create_member(&conn, home.id, "ana", &MemberProfile::default()).unwrap();
        let remote_post = post(&conn, remote.id, "from afar");
        let local_post = post(&conn, local.id, "from here");

        let report = delete_cascade(&mut conn, EntityRef::Node(peer.id)).unwrap();

        assert_eq!(report.removed(EntityKind::Node), 1);
        assert_eq!(report.removed(EntityKind::Member), 1);
        assert!(find_node_by_domain(&conn, "peer.example").unwrap().is_none());
        assert!(find_post(&conn, remote_post).unwrap().is_none());
        assert!(find_post(&conn, local_post).unwrap().is_some());
    }

    #[test]
    fn the_local_node_cannot_be_deleted() {
        let mut conn = test_support::open();
        let home = ensure_local_node(&conn, "home.example", "aa").unwrap();
        let err = delete_cascade(&mut conn, EntityRef::Node(home.id)).unwrap_err();
        assert!(matches!(err, StoreError::LocalNode));
    }

    #[test]
    fn missing_root_is_not_found() {
        let mut conn = test_support::open();
        let err = delete_cascade(&mut conn, EntityRef::Pool(404)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: EntityKind::Pool,
                ..
            }
        ));
    }
}
