use crate::codec::Params;
use crate::dispatch::Responder;
use crate::error::FederationError;
use crate::validate;
use arbor_store::content::upsert_remote_like;
use arbor_store::{delete_cascade, EntityRef, Node};
use rusqlite::Connection;

/// `like`: records that a peer member likes a post from any tree.
pub struct LikeResponder;

pub struct LikeInput {
    origin: Node,
    member_id: i64,
    post_id: i64,
    remote_id: i64,
}

impl Responder for LikeResponder {
    const COMMAND: &'static str = "like";
    const REQUIRED: &'static [&'static str] = &["username", "id", "post_id", "origin"];
    type Input = LikeInput;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<LikeInput, FederationError> {
        Ok(LikeInput {
            origin: peer.clone(),
            member_id: validate::acting_member(conn, params, peer)?.id,
            post_id: validate::referenced_post(conn, params, "post_id")?.id,
            remote_id: validate::remote_id(params, "id")?,
        })
    }

    fn respond(conn: &mut Connection, input: LikeInput) -> Result<(), FederationError> {
        upsert_remote_like(
            conn,
            &input.origin,
            input.member_id,
            input.post_id,
            input.remote_id,
        )?;
        Ok(())
    }
}

/// `like-delete`: withdraws a like made on the peer.
pub struct LikeDeleteResponder;

impl Responder for LikeDeleteResponder {
    const COMMAND: &'static str = "like-delete";
    const REQUIRED: &'static [&'static str] = &["id"];
    type Input = i64;

    fn resolve(conn: &Connection, params: &Params, peer: &Node) -> Result<i64, FederationError> {
        Ok(validate::peer_like(conn, params, peer)?.id)
    }

    fn respond(conn: &mut Connection, like_id: i64) -> Result<(), FederationError> {
        delete_cascade(conn, EntityRef::Like(like_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::Params;
    use crate::dispatch::Dispatcher;
    use crate::responders::test_support::forest;
    use arbor_store::content::{count_likes_on_post, find_like_by_reference, upsert_remote_post};
    use arbor_types::Visibility;

    #[test]
    fn like_is_idempotent_and_withdrawable() {
        let mut f = forest();
        let post =
            upsert_remote_post(&f.conn, &f.peer, f.author.id, 40, "tree rings", Visibility::Forest)
                .unwrap();
        let dispatcher = Dispatcher::with_default_responders();
        let params = Params::new()
            .with("username", "bo")
            .with("id", 8)
            .with("post_id", 40)
            .with("origin", "peer.example");

        dispatcher.dispatch(&mut f.conn, "like", &params, &f.peer).unwrap();
        dispatcher.dispatch(&mut f.conn, "like", &params, &f.peer).unwrap();
        assert_eq!(count_likes_on_post(&f.conn, post.id).unwrap(), 1);

        dispatcher
            .dispatch(&mut f.conn, "like-delete", &Params::new().with("id", 8), &f.peer)
            .unwrap();
        assert_eq!(count_likes_on_post(&f.conn, post.id).unwrap(), 0);
    }

    #[test]
    fn reusing_a_like_id_moves_the_like_instead_of_copying_it() {
        let mut f = forest();
        let first =
            upsert_remote_post(&f.conn, &f.peer, f.author.id, 1, "bark", Visibility::Forest).unwrap();
        let second =
            upsert_remote_post(&f.conn, &f.peer, f.author.id, 2, "sap", Visibility::Forest).unwrap();
        let dispatcher = Dispatcher::with_default_responders();
        let like = |post_id: i64| {
            Params::new()
                .with("username", "bo")
                .with("id", 8)
                .with("post_id", post_id)
                .with("origin", "peer.example")
        };

        dispatcher.dispatch(&mut f.conn, "like", &like(1), &f.peer).unwrap();
        dispatcher.dispatch(&mut f.conn, "like", &like(2), &f.peer).unwrap();
        assert_eq!(count_likes_on_post(&f.conn, first.id).unwrap(), 0);
        assert_eq!(count_likes_on_post(&f.conn, second.id).unwrap(), 1);

        dispatcher
            .dispatch(&mut f.conn, "like-delete", &Params::new().with("id", 8), &f.peer)
            .unwrap();
        assert_eq!(count_likes_on_post(&f.conn, second.id).unwrap(), 0);
        assert!(find_like_by_reference(&f.conn, &f.peer, 8).unwrap().is_none());
    }
}
