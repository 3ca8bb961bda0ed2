//! Posts, comments and likes.
//!
//! Content written on this tree has no `remote_id`; other trees refer to it
//! by its row id. Content replicated from another tree carries the id it has
//! on its origin, and `(remote_id, origin node)` identifies it. The
//! `*_by_reference` lookups implement that rule and the `upsert_remote_*`
//! helpers use it to keep replication idempotent.

use crate::{label_error, Node, StoreError};
use arbor_types::{EntityKind, Visibility};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub member_id: i64,
    pub remote_id: Option<i64>,
    pub text: String,
    pub visibility: Visibility,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub member_id: i64,
    pub remote_id: Option<i64>,
    pub text: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub member_id: i64,
    /// `None` once the post was removed by a cascade this comment is not
    /// part of.
    pub post_id: Option<i64>,
    pub remote_id: Option<i64>,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub member_id: i64,
    pub post_id: i64,
    pub remote_id: Option<i64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub member_id: i64,
    pub post_id: i64,
    pub remote_id: Option<i64>,
    pub created_at: String,
}

const POST_COLUMNS: &str = "p.id, p.member_id, p.remote_id, p.text, p.visibility, p.created_at, p.updated_at";
const COMMENT_COLUMNS: &str = "c.id, c.member_id, c.post_id, c.remote_id, c.text, c.created_at";
const LIKE_COLUMNS: &str = "l.id, l.member_id, l.post_id, l.remote_id, l.created_at";

fn map_row_to_post(row: &Row) -> rusqlite::Result<Post> {
    let visibility: String = row.get(4)?;
    Ok(Post {
        id: row.get(0)?,
        member_id: row.get(1)?,
        remote_id: row.get(2)?,
        text: row.get(3)?,
        visibility: visibility.parse().map_err(|e| label_error(4, e))?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_row_to_comment(row: &Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        member_id: row.get(1)?,
        post_id: row.get(2)?,
        remote_id: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_row_to_like(row: &Row) -> rusqlite::Result<Like> {
    Ok(Like {
        id: row.get(0)?,
        member_id: row.get(1)?,
        post_id: row.get(2)?,
        remote_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Returns the id column to match for a public identifier issued by `origin`.
fn reference_column(origin: &Node) -> &'static str {
    if origin.is_local {
        "id"
    } else {
        "remote_id"
    }
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

pub fn create_post(conn: &Connection, post: &NewPost) -> Result<Post, StoreError> {
    conn.execute(
        "INSERT INTO posts (member_id, remote_id, text, visibility) VALUES (?1, ?2, ?3, ?4)",
        params![
            post.member_id,
            post.remote_id,
            post.text,
            post.visibility.as_str()
        ],
    )?;
    get_post(conn, conn.last_insert_rowid())
}

pub fn find_post(conn: &Connection, id: i64) -> Result<Option<Post>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?1"),
            [id],
            map_row_to_post,
        )
        .optional()?)
}

pub fn get_post(conn: &Connection, id: i64) -> Result<Post, StoreError> {
    find_post(conn, id)?.ok_or_else(|| StoreError::not_found(EntityKind::Post, id))
}

/// Resolves the post `origin` knows as `public_id`, authored by any member
/// of that node.
pub fn find_post_by_reference(
    conn: &Connection,
    origin: &Node,
    public_id: i64,
) -> Result<Option<Post>, StoreError> {
    let sql = format!(
        "SELECT {POST_COLUMNS} FROM posts p
         JOIN members m ON m.id = p.member_id
         WHERE p.{} = ?1 AND m.node_id = ?2",
        reference_column(origin)
    );
    Ok(conn
        .query_row(&sql, params![public_id, origin.id], map_row_to_post)
        .optional()?)
}

/// Lists posts by one member, newest first.
pub fn list_posts_by_member(conn: &Connection, member_id: i64) -> Result<Vec<Post>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POST_COLUMNS} FROM posts p WHERE p.member_id = ?1 ORDER BY p.id DESC"
    ))?;
    let rows = stmt.query_map([member_id], map_row_to_post)?;
    let mut posts = Vec::new();
    for row in rows {
        posts.push(row?);
    }
    Ok(posts)
}

pub fn update_post(
    conn: &Connection,
    id: i64,
    text: &str,
    visibility: Visibility,
) -> Result<Post, StoreError> {
    let updated = conn.execute(
        "UPDATE posts SET text = ?1, visibility = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![text, visibility.as_str(), id],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found(EntityKind::Post, id));
    }
    get_post(conn, id)
}

/// Creates or updates the replica of a post written on `origin`.
pub fn upsert_remote_post(
    conn: &Connection,
    origin: &Node,
    member_id: i64,
    remote_id: i64,
    text: &str,
    visibility: Visibility,
) -> Result<Post, StoreError> {
    match find_post_by_reference(conn, origin, remote_id)? {
        Some(existing) => update_post(conn, existing.id, text, visibility),
        None => create_post(
            conn,
            &NewPost {
                member_id,
                remote_id: Some(remote_id),
                text: text.to_string(),
                visibility,
            },
        ),
    }
}

/// How other trees refer to `post`: the domain of its origin and the id it
/// has there.
pub fn public_reference(conn: &Connection, post: &Post) -> Result<(String, i64), StoreError> {
    let (domain, is_local): (String, bool) = conn.query_row(
        "SELECT n.domain, n.is_local FROM members m JOIN nodes n ON n.id = m.node_id
         WHERE m.id = ?1",
        [post.member_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let id = if is_local {
        post.id
    } else {
        post.remote_id
            .ok_or_else(|| StoreError::not_found(EntityKind::Post, post.id))?
    };
    Ok((domain, id))
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub fn create_comment(conn: &Connection, comment: &NewComment) -> Result<Comment, StoreError> {
    conn.execute(
        "INSERT INTO comments (member_id, post_id, remote_id, text) VALUES (?1, ?2, ?3, ?4)",
        params![
            comment.member_id,
            comment.post_id,
            comment.remote_id,
            comment.text
        ],
    )?;
    get_comment(conn, conn.last_insert_rowid())
}

pub fn find_comment(conn: &Connection, id: i64) -> Result<Option<Comment>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.id = ?1"),
            [id],
            map_row_to_comment,
        )
        .optional()?)
}

pub fn get_comment(conn: &Connection, id: i64) -> Result<Comment, StoreError> {
    find_comment(conn, id)?.ok_or_else(|| StoreError::not_found(EntityKind::Comment, id))
}

pub fn find_comment_by_reference(
    conn: &Connection,
    origin: &Node,
    public_id: i64,
) -> Result<Option<Comment>, StoreError> {
    let sql = format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c
         JOIN members m ON m.id = c.member_id
         WHERE c.{} = ?1 AND m.node_id = ?2",
        reference_column(origin)
    );
    Ok(conn
        .query_row(&sql, params![public_id, origin.id], map_row_to_comment)
        .optional()?)
}

/// Lists the comments attached to a post, oldest first.
pub fn list_comments_on_post(conn: &Connection, post_id: i64) -> Result<Vec<Comment>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments c WHERE c.post_id = ?1 ORDER BY c.id ASC"
    ))?;
    let rows = stmt.query_map([post_id], map_row_to_comment)?;
    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

pub fn update_comment_text(conn: &Connection, id: i64, text: &str) -> Result<Comment, StoreError> {
    let updated = conn.execute(
        "UPDATE comments SET text = ?1 WHERE id = ?2",
        params![text, id],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found(EntityKind::Comment, id));
    }
    get_comment(conn, id)
}

/// Creates or updates the replica of a comment written on `origin`.
pub fn upsert_remote_comment(
    conn: &Connection,
    origin: &Node,
    member_id: i64,
    post_id: i64,
    remote_id: i64,
    text: &str,
) -> Result<Comment, StoreError> {
    match find_comment_by_reference(conn, origin, remote_id)? {
        Some(existing) => update_comment_text(conn, existing.id, text),
        None => create_comment(
            conn,
            &NewComment {
                member_id,
                post_id,
                remote_id: Some(remote_id),
                text: text.to_string(),
            },
        ),
    }
}

// ---------------------------------------------------------------------------
// Likes
// ---------------------------------------------------------------------------

/// Records that a member likes a post. Liking the same post again keeps the
/// single existing row and refreshes its remote id.
pub fn upsert_like(
    conn: &Connection,
    member_id: i64,
    post_id: i64,
    remote_id: Option<i64>,
) -> Result<Like, StoreError> {
    conn.execute(
        "INSERT INTO post_likes (member_id, post_id, remote_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (member_id, post_id) DO UPDATE SET remote_id = excluded.remote_id",
        params![member_id, post_id, remote_id],
    )?;
    conn.query_row(
        &format!("SELECT {LIKE_COLUMNS} FROM post_likes l WHERE l.member_id = ?1 AND l.post_id = ?2"),
        params![member_id, post_id],
        map_row_to_like,
    )
    .map_err(StoreError::from)
}

/// Creates or updates the replica of a like made on `origin`.
///
/// `remote_id` names at most one row for `origin`: a like already known by
/// it is moved to `member_id` and `post_id` in place rather than
/// duplicated.
pub fn upsert_remote_like(
    conn: &Connection,
    origin: &Node,
    member_id: i64,
    post_id: i64,
    remote_id: i64,
) -> Result<Like, StoreError> {
    match find_like_by_reference(conn, origin, remote_id)? {
        Some(existing) => {
            // OR REPLACE drops an older like of the same member on the same post.
            conn.execute(
                "UPDATE OR REPLACE post_likes SET member_id = ?1, post_id = ?2 WHERE id = ?3",
                params![member_id, post_id, existing.id],
            )?;
            get_like(conn, existing.id)
        }
        None => upsert_like(conn, member_id, post_id, Some(remote_id)),
    }
}

pub fn find_like(conn: &Connection, id: i64) -> Result<Option<Like>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {LIKE_COLUMNS} FROM post_likes l WHERE l.id = ?1"),
            [id],
            map_row_to_like,
        )
        .optional()?)
}

/// The like `member_id` left on `post_id`, if any.
pub fn find_member_like(
    conn: &Connection,
    member_id: i64,
    post_id: i64,
) -> Result<Option<Like>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {LIKE_COLUMNS} FROM post_likes l WHERE l.member_id = ?1 AND l.post_id = ?2"),
            params![member_id, post_id],
            map_row_to_like,
        )
        .optional()?)
}

pub fn get_like(conn: &Connection, id: i64) -> Result<Like, StoreError> {
    find_like(conn, id)?.ok_or_else(|| StoreError::not_found(EntityKind::Like, id))
}

pub fn find_like_by_reference(
    conn: &Connection,
    origin: &Node,
    public_id: i64,
) -> Result<Option<Like>, StoreError> {
    let sql = format!(
        "SELECT {LIKE_COLUMNS} FROM post_likes l
         JOIN members m ON m.id = l.member_id
         WHERE l.{} = ?1 AND m.node_id = ?2",
        reference_column(origin)
    );
    Ok(conn
        .query_row(&sql, params![public_id, origin.id], map_row_to_like)
        .optional()?)
}

pub fn count_likes_on_post(conn: &Connection, post_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
        [post_id],
        |row| row.get(0),
    )?)
}
