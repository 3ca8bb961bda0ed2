use crate::codec::Params;
use crate::dispatch::Responder;
use crate::error::FederationError;
use crate::validate;
use arbor_store::members::{upsert_member, MemberProfile};
use arbor_store::Node;
use rusqlite::Connection;

/// `member`: creates or refreshes a member of the peer's tree.
pub struct MemberResponder;

pub struct MemberInput {
    node_id: i64,
    username: String,
    profile: MemberProfile,
}

impl Responder for MemberResponder {
    const COMMAND: &'static str = "member";
    const REQUIRED: &'static [&'static str] = &["username"];
    type Input = MemberInput;

    fn resolve(
        _conn: &Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<MemberInput, FederationError> {
        Ok(MemberInput {
            node_id: peer.id,
            username: validate::text(params, "username")?,
            profile: MemberProfile {
                name_display: params.text("name_display"),
                description: params.text("description"),
                avatar_url: params.text("avatar_url"),
            },
        })
    }

    fn respond(conn: &mut Connection, input: MemberInput) -> Result<(), FederationError> {
        upsert_member(conn, input.node_id, &input.username, &input.profile)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::Params;
    use crate::dispatch::Dispatcher;
    use crate::responders::test_support::forest;
    use arbor_store::members::{find_member, list_members};

    #[test]
    fn member_is_created_then_refreshed() {
        let mut f = forest();
        let dispatcher = Dispatcher::with_default_responders();

        let params = Params::new()
            .with("username", "cy")
            .with("name_display", "Cy");
        dispatcher.dispatch(&mut f.conn, "member", &params, &f.peer).unwrap();
        let params = params.with("name_display", "Cyrus");
        dispatcher.dispatch(&mut f.conn, "member", &params, &f.peer).unwrap();

        let member = find_member(&f.conn, f.peer.id, "cy").unwrap().unwrap();
        assert_eq!(member.name_display.as_deref(), Some("Cyrus"));
        assert_eq!(list_members(&f.conn, f.peer.id).unwrap().len(), 2);
        assert!(list_members(&f.conn, f.home.id).unwrap().is_empty());
    }
}
