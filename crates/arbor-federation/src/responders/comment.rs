use crate::codec::Params;
use crate::dispatch::Responder;
use crate::error::FederationError;
use crate::validate;
use arbor_store::content::upsert_remote_comment;
use arbor_store::{delete_cascade, EntityRef, Member, Node, Post};
use rusqlite::Connection;

/// `comment`: records a peer member's comment on a post from any tree.
pub struct CommentResponder;

pub struct CommentInput {
    origin: Node,
    author: Member,
    post: Post,
    remote_id: i64,
    text: String,
}

impl Responder for CommentResponder {
    const COMMAND: &'static str = "comment";
    const REQUIRED: &'static [&'static str] = &["username", "id", "post_id", "origin", "text"];
    type Input = CommentInput;

    fn resolve(
        conn: &Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<CommentInput, FederationError> {
        Ok(CommentInput {
            origin: peer.clone(),
            author: validate::acting_member(conn, params, peer)?,
            post: validate::referenced_post(conn, params, "post_id")?,
            remote_id: validate::remote_id(params, "id")?,
            text: validate::text(params, "text")?,
        })
    }

    fn respond(conn: &mut Connection, input: CommentInput) -> Result<(), FederationError> {
        upsert_remote_comment(
            conn,
            &input.origin,
            input.author.id,
            input.post.id,
            input.remote_id,
            &input.text,
        )?;
        Ok(())
    }
}

/// `comment-delete`: removes a comment written on the peer.
pub struct CommentDeleteResponder;

impl Responder for CommentDeleteResponder {
    const COMMAND: &'static str = "comment-delete";
    const REQUIRED: &'static [&'static str] = &["id"];
    type Input = i64;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<i64, FederationError> {
        Ok(validate::peer_comment(conn, params, peer)?.id)
    }

    fn respond(conn: &mut Connection, comment_id: i64) -> Result<(), FederationError> {
        delete_cascade(conn, EntityRef::Comment(comment_id))?;
        Ok(())
    }
}
