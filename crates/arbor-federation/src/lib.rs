//! Federation protocol for Arbor trees.
//!
//! Trees exchange newline-delimited JSON frames over TCP. A connection
//! starts unauthenticated; the connecting tree introduces itself with its
//! domain and Ed25519 public key, the accepting tree answers with a random
//! challenge, and the connecting tree signs it. Only then are commands
//! accepted.
//!
//! Each command is checked in two stages before anything is written:
//! required parameters first, then resolution of every reference
//! (`username`, `pool_id`, `post_id` with `origin`, ...) to a row the
//! authenticated peer may act on. Failures come back as reply codes
//! (`MISSING PARAMETER`, `NOT FOUND`, `ERROR`) and never end the
//! connection; a failed handshake does.
//!
//! This crate is transport-agnostic apart from [`client::PeerLink`]; the
//! listening side lives in `arbor-server`.

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod responders;
pub mod session;
pub mod validate;

pub use client::{PeerLink, Reply};
pub use codec::{Frame, FrameCodec, Params, MAX_FRAME_LEN};
pub use dispatch::{Dispatcher, Handler, Responder};
pub use error::{FederationError, ProtocolError};
pub use keys::{KeyError, KeyStore};
pub use session::{Session, SessionState};
