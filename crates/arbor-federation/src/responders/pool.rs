use crate::codec::Params;
use crate::dispatch::Responder;
use crate::error::{FederationError, ProtocolError};
use crate::validate;
use arbor_store::pools::{
    add_post_to_pool, find_pool_by_reference, remove_post_from_pool, upsert_remote_pool,
};
use arbor_store::{delete_cascade, EntityRef, Node, Pool, Post};
use rusqlite::Connection;

/// `pool`: creates or renames a pool owned by a peer member.
pub struct PoolResponder;

pub struct PoolInput {
    origin: Node,
    member_id: i64,
    remote_id: i64,
    name: String,
    sprung: bool,
}

fn flag(params: &Params, key: &str) -> Result<bool, FederationError> {
    match params.text(key).as_deref() {
        None | Some("0" | "false") => Ok(false),
        Some("1" | "true") => Ok(true),
        Some(_) => Err(ProtocolError::InvalidParameter {
            key: key.to_string(),
        }
        .into()),
    }
}

impl Responder for PoolResponder {
    const COMMAND: &'static str = "pool";
    const REQUIRED: &'static [&'static str] = &["username", "id", "name"];
    type Input = PoolInput;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<PoolInput, FederationError> {
        let member = validate::acting_member(conn, params, peer)?;
        let remote_id = validate::remote_id(params, "id")?;
        // The peer's id for a pool belongs to one member only.
        if let Some(existing) = find_pool_by_reference(conn, peer, remote_id)? {
            if existing.member_id != member.id {
                return Err(FederationError::not_found("pool"));
            }
        }
        Ok(PoolInput {
            origin: peer.clone(),
            member_id: member.id,
            remote_id,
            name: validate::text(params, "name")?,
            sprung: flag(params, "sprung")?,
        })
    }

    fn respond(conn: &mut Connection, input: PoolInput) -> Result<(), FederationError> {
        upsert_remote_pool(
            conn,
            &input.origin,
            input.member_id,
            input.remote_id,
            &input.name,
            input.sprung,
        )?;
        Ok(())
    }
}

/// `pool-delete`: removes a peer member's pool and its memberships.
pub struct PoolDeleteResponder;

impl Responder for PoolDeleteResponder {
    const COMMAND: &'static str = "pool-delete";
    const REQUIRED: &'static [&'static str] = &["username", "id"];
    type Input = i64;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<i64, FederationError> {
        let member = validate::acting_member(conn, params, peer)?;
        Ok(validate::member_pool(conn, params, "id", peer, &member)?.id)
    }

    fn respond(conn: &mut Connection, pool_id: i64) -> Result<(), FederationError> {
        delete_cascade(conn, EntityRef::Pool(pool_id))?;
        Ok(())
    }
}

/// A pool of the acting member and the post to add to or remove from it.
pub struct PoolPostInput {
    pool: Pool,
    post: Post,
}

fn resolve_pool_post(
    conn: &Connection,
    params: &Params,
    peer: &Node,
) -> Result<PoolPostInput, FederationError> {
    let member = validate::acting_member(conn, params, peer)?;
    let pool = validate::member_pool(conn, params, "pool_id", peer, &member)?;
    let post = validate::referenced_post(conn, params, "post_id")?;
    Ok(PoolPostInput { pool, post })
}

/// `pool-post`: adds a post from any tree to a peer member's pool.
pub struct PoolPostResponder;

impl Responder for PoolPostResponder {
    const COMMAND: &'static str = "pool-post";
    const REQUIRED: &'static [&'static str] = &["username", "pool_id", "post_id", "origin"];
    type Input = PoolPostInput;

    fn resolve(
        conn: &Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<PoolPostInput, FederationError> {
        resolve_pool_post(conn, params, peer)
    }

    fn respond(conn: &mut Connection, input: PoolPostInput) -> Result<(), FederationError> {
        if !add_post_to_pool(conn, input.pool.id, input.post.id)? {
            tracing::debug!(pool_id = input.pool.id, post_id = input.post.id, "post already pooled");
        }
        Ok(())
    }
}

/// `pool-post-delete`: takes a post out of a peer member's pool.
pub struct PoolPostDeleteResponder;

impl Responder for PoolPostDeleteResponder {
    const COMMAND: &'static str = "pool-post-delete";
    const REQUIRED: &'static [&'static str] = &["username", "pool_id", "post_id", "origin"];
    type Input = PoolPostInput;

    fn resolve(
        conn: &Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<PoolPostInput, FederationError> {
        resolve_pool_post(conn, params, peer)
    }

    fn respond(conn: &mut Connection, input: PoolPostInput) -> Result<(), FederationError> {
        remove_post_from_pool(conn, input.pool.id, input.post.id)?;
        Ok(())
    }
}
