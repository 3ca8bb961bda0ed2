//! Per-connection handshake state machine.
//!
//! ```text
//! Connected --introduce--> Introduced --(challenge sent)--> Challenged
//!     --authenticate ok--> Authenticated
//! any failure, or disconnect -----------------------------> Closed
//! ```
//!
//! A session holds no transport; the listener feeds it decoded frames and
//! writes back whatever it returns.

use crate::codec::Frame;
use crate::dispatch::Dispatcher;
use crate::error::{FederationError, ProtocolError};
use crate::keys::{parse_public_key, verify_proof, NONCE_LEN};
use arbor_store::nodes::{create_node, find_node_by_domain};
use arbor_store::{NewNode, Node};
use arbor_types::TrustState;
use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Introduced,
    Challenged,
    Authenticated,
    Closed,
}

/// Identity a peer claimed in its `introduce` frame.
#[derive(Debug)]
struct Claim {
    domain: String,
    key: VerifyingKey,
}

#[derive(Debug)]
pub struct Session {
    local_domain: String,
    state: SessionState,
    claim: Option<Claim>,
    nonce: Option<[u8; NONCE_LEN]>,
    peer: Option<Node>,
}

impl Session {
    pub fn new(local_domain: impl Into<String>) -> Self {
        Self {
            local_domain: local_domain.into(),
            state: SessionState::Connected,
            claim: None,
            nonce: None,
            peer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// The authenticated peer, once the handshake has completed.
    pub fn peer(&self) -> Option<&Node> {
        self.peer.as_ref()
    }

    /// Ends the session. Any pending challenge is discarded.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.claim = None;
        self.nonce = None;
        self.peer = None;
    }

    fn fail(&mut self) -> FederationError {
        self.close();
        FederationError::Authentication
    }

    /// Processes one inbound frame and returns the frame to send back.
    ///
    /// Errors are meant to be turned into a reply with
    /// [`Frame::error_reply`]; those for which
    /// [`FederationError::closes_connection`] holds have already closed the
    /// session.
    pub fn handle_frame(
        &mut self,
        conn: &mut Connection,
        dispatcher: &Dispatcher,
        frame: Frame,
    ) -> Result<Frame, FederationError> {
        match frame {
            Frame::Introduce { public_key, domain } => self.introduce(&domain, &public_key),
            Frame::Authenticate { signature } => {
                self.authenticate(conn, &signature)?;
                Ok(Frame::ok())
            }
            Frame::Command { command, params } => {
                let peer = match self.peer.as_ref() {
                    Some(peer) if self.state == SessionState::Authenticated => peer,
                    _ => {
                        tracing::warn!(command = %command, state = ?self.state, "command before authentication");
                        return Err(self.fail());
                    }
                };
                dispatcher.dispatch(conn, &command, &params, peer)?;
                Ok(Frame::ok())
            }
            other @ (Frame::Challenge { .. } | Frame::Reply { .. }) => {
                Err(ProtocolError::UnexpectedFrame(other.kind()).into())
            }
        }
    }

    /// Records the claimed identity and issues a fresh challenge.
    pub fn introduce(&mut self, domain: &str, public_key: &str) -> Result<Frame, FederationError> {
        if self.state != SessionState::Connected {
            tracing::warn!(state = ?self.state, "repeated introduce");
            return Err(self.fail());
        }
        let domain = domain.trim();
        if domain.is_empty() || domain.eq_ignore_ascii_case(&self.local_domain) {
            tracing::warn!(domain, "peer introduced with an unusable domain");
            return Err(self.fail());
        }
        let key = match parse_public_key(public_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(domain, error = %e, "peer introduced with a malformed key");
                return Err(self.fail());
            }
        };
        self.claim = Some(Claim {
            domain: domain.to_ascii_lowercase(),
            key,
        });
        self.state = SessionState::Introduced;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        self.nonce = Some(nonce);
        self.state = SessionState::Challenged;
        tracing::debug!(domain, "challenge issued");
        Ok(Frame::Challenge {
            nonce: hex::encode(nonce),
        })
    }

    /// Verifies the proof for the outstanding challenge.
    ///
    /// The challenge is consumed whether or not the proof holds. A domain
    /// already on record must present the key pinned for it; a new domain
    /// is recorded as an untrusted node.
    pub fn authenticate(
        &mut self,
        conn: &Connection,
        signature: &str,
    ) -> Result<&Node, FederationError> {
        let (Some(claim), Some(nonce)) = (self.claim.take(), self.nonce.take()) else {
            tracing::warn!(state = ?self.state, "authenticate without a challenge");
            return Err(self.fail());
        };
        if self.state != SessionState::Challenged {
            return Err(self.fail());
        }
        if !verify_proof(&claim.key, &nonce, &claim.domain, &self.local_domain, signature) {
            tracing::warn!(domain = %claim.domain, "handshake proof rejected");
            return Err(self.fail());
        }

        let key_hex = hex::encode(claim.key.as_bytes());
        let lookup = find_node_by_domain(conn, &claim.domain);
        let node = match lookup {
            Ok(Some(node)) if node.is_local => {
                tracing::warn!(domain = %claim.domain, "peer claimed the local domain");
                return Err(self.fail());
            }
            Ok(Some(node)) if !node.public_key.eq_ignore_ascii_case(&key_hex) => {
                tracing::warn!(domain = %claim.domain, "key does not match the pinned key");
                return Err(self.fail());
            }
            Ok(Some(node)) => node,
            Ok(None) => {
                let created = create_node(
                    conn,
                    &NewNode {
                        domain: claim.domain.clone(),
                        public_key: key_hex,
                        trust: TrustState::Unknown,
                        is_local: false,
                    },
                );
                match created {
                    Ok(node) => node,
                    Err(e) => {
                        self.close();
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.close();
                return Err(e.into());
            }
        };

        tracing::info!(domain = %node.domain, trust = %node.trust, "peer authenticated");
        self.state = SessionState::Authenticated;
        let peer: &Node = self.peer.insert(node);
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyStore;
    use arbor_store::nodes::{ensure_known_node, ensure_local_node};

    const LOCAL: &str = "home.example";
    const PEER: &str = "peer.example";

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        arbor_db::run_migrations(&conn).unwrap();
        ensure_local_node(&conn, LOCAL, &KeyStore::generate().public_key_hex()).unwrap();
        conn
    }

    fn nonce_of(frame: &Frame) -> Vec<u8> {
        match frame {
            Frame::Challenge { nonce } => hex::decode(nonce).unwrap(),
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn valid_proof_authenticates_unknown_peer() {
        let conn = open();
        let keys = KeyStore::generate();
        let mut session = Session::new(LOCAL);

        let challenge = session.introduce(PEER, &keys.public_key_hex()).unwrap();
        assert_eq!(session.state(), SessionState::Challenged);

        let proof = keys.prove(&nonce_of(&challenge), PEER, LOCAL);
        let peer = session.authenticate(&conn, &proof).unwrap();
        assert_eq!(peer.domain, PEER);
        assert_eq!(peer.trust, TrustState::Unknown);
        assert!(session.is_authenticated());
    }

    #[test]
    fn configured_peer_keeps_known_trust() {
        let conn = open();
        let keys = KeyStore::generate();
        ensure_known_node(&conn, PEER, &keys.public_key_hex()).unwrap();
        let mut session = Session::new(LOCAL);

        let challenge = session.introduce(PEER, &keys.public_key_hex()).unwrap();
        let proof = keys.prove(&nonce_of(&challenge), PEER, LOCAL);
        assert_eq!(session.authenticate(&conn, &proof).unwrap().trust, TrustState::Known);
    }

    #[test]
    fn wrong_signature_closes_session() {
        let conn = open();
        let keys = KeyStore::generate();
        let mut session = Session::new(LOCAL);

        let challenge = session.introduce(PEER, &keys.public_key_hex()).unwrap();
        let proof = keys.prove(&nonce_of(&challenge), PEER, "elsewhere.example");
        let err = session.authenticate(&conn, &proof).unwrap_err();

        assert!(matches!(err, FederationError::Authentication));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(find_node_by_domain(&conn, PEER).unwrap().is_none());
    }

    #[test]
    fn fresh_key_for_pinned_domain_is_rejected() {
        let conn = open();
        ensure_known_node(&conn, PEER, &KeyStore::generate().public_key_hex()).unwrap();
        let impostor = KeyStore::generate();
        let mut session = Session::new(LOCAL);

        let challenge = session.introduce(PEER, &impostor.public_key_hex()).unwrap();
        let proof = impostor.prove(&nonce_of(&challenge), PEER, LOCAL);

        assert!(session.authenticate(&conn, &proof).is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn peer_cannot_claim_the_local_domain() {
        let keys = KeyStore::generate();
        let mut session = Session::new(LOCAL);
        assert!(session.introduce(LOCAL, &keys.public_key_hex()).is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn challenge_cannot_be_answered_twice() {
        let conn = open();
        let keys = KeyStore::generate();
        let mut session = Session::new(LOCAL);

        let challenge = session.introduce(PEER, &keys.public_key_hex()).unwrap();
        let proof = keys.prove(&nonce_of(&challenge), PEER, LOCAL);
        session.authenticate(&conn, &proof).unwrap();

        assert!(session.authenticate(&conn, &proof).is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn command_before_authentication_is_rejected() {
        let mut conn = open();
        let dispatcher = Dispatcher::with_default_responders();
        let mut session = Session::new(LOCAL);

        let err = session
            .handle_frame(
                &mut conn,
                &dispatcher,
                Frame::command("member", crate::codec::Params::new().with("username", "ana")),
            )
            .unwrap_err();
        assert!(matches!(err, FederationError::Authentication));
        assert!(err.closes_connection());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn stray_reply_frame_is_a_protocol_error() {
        let mut conn = open();
        let dispatcher = Dispatcher::with_default_responders();
        let mut session = Session::new(LOCAL);

        let err = session
            .handle_frame(&mut conn, &dispatcher, Frame::ok())
            .unwrap_err();
        assert!(matches!(
            err,
            FederationError::Protocol(ProtocolError::UnexpectedFrame("reply"))
        ));
        assert_eq!(session.state(), SessionState::Connected);
    }
}
