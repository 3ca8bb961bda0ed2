//! Checks run before any responder touches the store.
//!
//! Required keys are checked first, in the order the command declares them;
//! then each reference is resolved to a row the authenticated peer may act
//! on. The first failure wins and nothing has been written when it is
//! reported.

use crate::codec::Params;
use crate::error::FederationError;
use arbor_store::content::{find_comment_by_reference, find_like_by_reference, find_post_by_reference};
use arbor_store::members::find_member;
use arbor_store::nodes::find_node_by_domain;
use arbor_store::pools::find_member_pool;
use arbor_store::{Comment, Like, Member, Node, Pool, Post};
use rusqlite::Connection;

/// Fails with the first key of `required` that is absent or blank.
pub fn require_params(params: &Params, required: &[&str]) -> Result<(), FederationError> {
    match required.iter().find(|key| params.text(key).is_none()) {
        Some(key) => Err(FederationError::MissingParameter(key.to_string())),
        None => Ok(()),
    }
}

/// A required text parameter.
pub fn text(params: &Params, key: &str) -> Result<String, FederationError> {
    params
        .text(key)
        .ok_or_else(|| FederationError::MissingParameter(key.to_string()))
}

/// A required identifier. A value that is not an integer cannot name any
/// row, so it reports `reference` as not found.
fn identifier(params: &Params, key: &str, reference: &str) -> Result<i64, FederationError> {
    text(params, key)?;
    params
        .integer(key)
        .ok_or_else(|| FederationError::not_found(reference))
}

/// The integer identifier the peer uses for the entity being written.
pub fn remote_id(params: &Params, key: &str) -> Result<i64, FederationError> {
    text(params, key)?;
    params.integer(key).ok_or_else(|| {
        FederationError::Protocol(crate::error::ProtocolError::InvalidParameter {
            key: key.to_string(),
        })
    })
}

/// The member named by `username`, looked up among the peer's own members.
///
/// A peer can only act for members of its own tree; a same-named member of
/// any other tree does not resolve.
pub fn acting_member(
    conn: &Connection,
    params: &Params,
    peer: &Node,
) -> Result<Member, FederationError> {
    let username = text(params, "username")?;
    find_member(conn, peer.id, &username)?.ok_or_else(|| FederationError::not_found("member"))
}

/// The node named by the `origin` parameter. Domains are stored lowercase,
/// so the name is matched case-insensitively.
pub fn origin_node(conn: &Connection, params: &Params) -> Result<Node, FederationError> {
    let domain = text(params, "origin")?.trim().to_ascii_lowercase();
    find_node_by_domain(conn, &domain)?.ok_or_else(|| FederationError::not_found("origin"))
}

/// The post `origin` knows by the id under `key`. The post may belong to
/// any tree, including this one.
pub fn referenced_post(
    conn: &Connection,
    params: &Params,
    key: &str,
) -> Result<Post, FederationError> {
    let origin = origin_node(conn, params)?;
    let id = identifier(params, key, "post")?;
    find_post_by_reference(conn, &origin, id)?.ok_or_else(|| FederationError::not_found("post"))
}

/// A pool of `member`, named by the peer's id for it under `key`.
pub fn member_pool(
    conn: &Connection,
    params: &Params,
    key: &str,
    peer: &Node,
    member: &Member,
) -> Result<Pool, FederationError> {
    let id = identifier(params, key, "pool")?;
    find_member_pool(conn, peer, member.id, id)?.ok_or_else(|| FederationError::not_found("pool"))
}

/// A post written on the peer's tree, named by the peer's id for it.
pub fn peer_post(conn: &Connection, params: &Params, peer: &Node) -> Result<Post, FederationError> {
    let id = identifier(params, "id", "post")?;
    find_post_by_reference(conn, peer, id)?.ok_or_else(|| FederationError::not_found("post"))
}

pub fn peer_comment(
    conn: &Connection,
    params: &Params,
    peer: &Node,
) -> Result<Comment, FederationError> {
    let id = identifier(params, "id", "comment")?;
    find_comment_by_reference(conn, peer, id)?.ok_or_else(|| FederationError::not_found("comment"))
}

pub fn peer_like(conn: &Connection, params: &Params, peer: &Node) -> Result<Like, FederationError> {
    let id = identifier(params, "id", "like")?;
    find_like_by_reference(conn, peer, id)?.ok_or_else(|| FederationError::not_found("like"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_missing_key_in_declared_order_wins() {
        let params = Params::new().with("username", "ana").with("post_id", " ");
        let err = require_params(&params, &["username", "pool_id", "post_id"]).unwrap_err();
        assert!(matches!(err, FederationError::MissingParameter(key) if key == "pool_id"));
    }

    #[test]
    fn numbers_satisfy_required_keys() {
        let params = Params::new().with("id", 12).with("username", "ana");
        assert!(require_params(&params, &["username", "id"]).is_ok());
        assert_eq!(remote_id(&params, "id").unwrap(), 12);
    }

    #[test]
    fn non_integer_remote_id_is_invalid() {
        let params = Params::new().with("id", "twelve");
        let err = remote_id(&params, "id").unwrap_err();
        assert!(matches!(
            err,
            FederationError::Protocol(crate::error::ProtocolError::InvalidParameter { .. })
        ));
    }
}
