//! Initiator and responder sides of the handshake talking over an in-memory
//! stream.

use arbor_federation::{
    Dispatcher, FederationError, Frame, FrameCodec, KeyStore, Params, PeerLink, Session,
    SessionState,
};
use arbor_store::members::find_member;
use arbor_store::nodes::{ensure_known_node, ensure_local_node, find_node_by_domain};
use arbor_types::{ReplyCode, TrustState};
use futures_util::{SinkExt, StreamExt};
use rusqlite::Connection;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

const HOME: &str = "home.example";
const VISITOR: &str = "visitor.example";
const TIMEOUT: Duration = Duration::from_secs(5);

fn store() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    arbor_db::run_migrations(&conn).unwrap();
    ensure_local_node(&conn, HOME, &KeyStore::generate().public_key_hex()).unwrap();
    conn
}

/// Minimal accepting side: feeds frames to a session until the stream ends
/// or the session must close.
async fn accept(stream: DuplexStream, mut conn: Connection) -> (Session, Connection) {
    let mut framed = Framed::new(stream, FrameCodec::new());
    let dispatcher = Dispatcher::with_default_responders();
    let mut session = Session::new(HOME);
    while let Some(item) = framed.next().await {
        let result = match item.unwrap() {
            Ok(frame) => session.handle_frame(&mut conn, &dispatcher, frame),
            Err(e) => Err(FederationError::from(e)),
        };
        let (reply, close) = match result {
            Ok(frame) => (frame, false),
            Err(e) => (Frame::error_reply(&e), e.closes_connection()),
        };
        if framed.send(reply).await.is_err() || close {
            break;
        }
    }
    (session, conn)
}

#[tokio::test]
async fn authenticated_link_carries_commands() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let keys = KeyStore::generate();

    let visitor = async {
        let mut link = PeerLink::handshake(client, &keys, VISITOR, HOME, TIMEOUT)
            .await
            .unwrap();
        let created = link
            .send_command("member", Params::new().with("username", "fern"))
            .await
            .unwrap();
        let refused = link
            .send_command(
                "pool-post",
                Params::new().with("username", "fern").with("post_id", 1),
            )
            .await
            .unwrap();
        let unsupported = link.send_command("gossip", Params::new()).await.unwrap();
        (created, refused, unsupported)
    };

    let ((created, refused, unsupported), (session, conn)) =
        tokio::join!(visitor, accept(server, store()));

    assert!(created.is_ok());
    assert_eq!(refused.code, ReplyCode::MissingParameter);
    assert_eq!(refused.message.as_deref(), Some("pool_id"));
    assert_eq!(unsupported.code, ReplyCode::Error);

    assert_eq!(session.state(), SessionState::Authenticated);
    let node = find_node_by_domain(&conn, VISITOR).unwrap().unwrap();
    assert_eq!(node.trust, TrustState::Unknown);
    assert_eq!(node.public_key, keys.public_key_hex());
    assert!(find_member(&conn, node.id, "fern").unwrap().is_some());
}

#[tokio::test]
async fn impostor_for_a_pinned_domain_is_refused() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let conn = store();
    ensure_known_node(&conn, VISITOR, &KeyStore::generate().public_key_hex()).unwrap();
    let impostor = KeyStore::generate();

    let visitor = PeerLink::handshake(client, &impostor, VISITOR, HOME, TIMEOUT);
    let (result, (session, _conn)) = tokio::join!(visitor, accept(server, conn));

    assert!(matches!(result, Err(FederationError::Authentication)));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn command_without_handshake_closes_the_connection() {
    let (client, server) = tokio::io::duplex(64 * 1024);

    let visitor = async {
        let mut framed = Framed::new(client, FrameCodec::new());
        framed
            .send(Frame::command("member", Params::new().with("username", "fern")))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap().unwrap();
        let after = framed.next().await;
        (reply, after.is_none())
    };

    let ((reply, closed), (session, conn)) = tokio::join!(visitor, accept(server, store()));

    assert_eq!(
        reply,
        Frame::Reply {
            code: ReplyCode::Unauthenticated,
            message: None
        }
    );
    assert!(closed);
    assert_eq!(session.state(), SessionState::Closed);
    let members: i64 = conn
        .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))
        .unwrap();
    assert_eq!(members, 0);
}
