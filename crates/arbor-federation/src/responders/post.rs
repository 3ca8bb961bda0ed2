use crate::codec::Params;
use crate::dispatch::Responder;
use crate::error::{FederationError, ProtocolError};
use crate::validate;
use arbor_store::content::upsert_remote_post;
use arbor_store::{delete_cascade, EntityRef, Member, Node};
use arbor_types::Visibility;
use rusqlite::Connection;

/// `post`: creates or updates the replica of a post written on the peer.
pub struct PostResponder;

pub struct PostInput {
    origin: Node,
    author: Member,
    remote_id: i64,
    text: String,
    visibility: Visibility,
}

impl Responder for PostResponder {
    const COMMAND: &'static str = "post";
    const REQUIRED: &'static [&'static str] = &["username", "id", "text"];
    type Input = PostInput;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<PostInput, FederationError> {
        let author = validate::acting_member(conn, params, peer)?;
        let visibility = match params.text("visibility") {
            Some(label) => label.parse().map_err(|_| ProtocolError::InvalidParameter {
                key: "visibility".to_string(),
            })?,
            None => Visibility::default(),
        };
        Ok(PostInput {
            origin: peer.clone(),
            author,
            remote_id: validate::remote_id(params, "id")?,
            text: validate::text(params, "text")?,
            visibility,
        })
    }

    fn respond(conn: &mut Connection, input: PostInput) -> Result<(), FederationError> {
        upsert_remote_post(
            conn,
            &input.origin,
            input.author.id,
            input.remote_id,
            &input.text,
            input.visibility,
        )?;
        Ok(())
    }
}

/// `post-delete`: removes a replicated post and everything that hangs off it.
pub struct PostDeleteResponder;

impl Responder for PostDeleteResponder {
    const COMMAND: &'static str = "post-delete";
    const REQUIRED: &'static [&'static str] = &["id"];
    type Input = i64;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<i64, FederationError> {
        Ok(validate::peer_post(conn, params, peer)?.id)
    }

    fn respond(conn: &mut Connection, post_id: i64) -> Result<(), FederationError> {
        delete_cascade(conn, EntityRef::Post(post_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::Params;
    use crate::dispatch::Dispatcher;
    use crate::error::FederationError;
    use crate::responders::test_support::forest;
    use arbor_store::content::{find_post_by_reference, list_posts_by_member};
    use arbor_types::Visibility;

    #[test]
    fn repeated_post_updates_the_replica() {
        let mut f = forest();
        let dispatcher = Dispatcher::with_default_responders();
        let params = Params::new()
            .with("username", "bo")
            .with("id", 31)
            .with("text", "first draft");
        dispatcher.dispatch(&mut f.conn, "post", &params, &f.peer).unwrap();

        let params = params.with("text", "final").with("visibility", "internet");
        dispatcher.dispatch(&mut f.conn, "post", &params, &f.peer).unwrap();

        let posts = list_posts_by_member(&f.conn, f.author.id).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "final");
        assert_eq!(posts[0].visibility, Visibility::Internet);
        assert_eq!(posts[0].remote_id, Some(31));
    }

    #[test]
    fn unknown_visibility_is_rejected() {
        let mut f = forest();
        let dispatcher = Dispatcher::with_default_responders();
        let params = Params::new()
            .with("username", "bo")
            .with("id", 1)
            .with("text", "hi")
            .with("visibility", "friends");
        let err = dispatcher.dispatch(&mut f.conn, "post", &params, &f.peer).unwrap_err();
        assert!(matches!(err, FederationError::Protocol(_)));
        assert!(list_posts_by_member(&f.conn, f.author.id).unwrap().is_empty());
    }

    #[test]
    fn post_delete_only_reaches_the_peers_posts() {
        let mut f = forest();
        let dispatcher = Dispatcher::with_default_responders();
        let params = Params::new().with("username", "bo").with("id", 5).with("text", "x");
        dispatcher.dispatch(&mut f.conn, "post", &params, &f.peer).unwrap();

        let missing = Params::new().with("id", 6);
        let err = dispatcher
            .dispatch(&mut f.conn, "post-delete", &missing, &f.peer)
            .unwrap_err();
        assert!(matches!(err, FederationError::NotFound(r) if r == "post"));

        let params = Params::new().with("id", 5);
        dispatcher.dispatch(&mut f.conn, "post-delete", &params, &f.peer).unwrap();
        assert!(find_post_by_reference(&f.conn, &f.peer, 5).unwrap().is_none());
    }
}
