//! Error taxonomy of the federation protocol.

use arbor_store::StoreError;
use arbor_types::ReplyCode;
use thiserror::Error;

/// A message could not be understood.
///
/// Never fatal to the process; a malformed frame is answered with an
/// `ERROR` reply and the connection keeps reading.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("parameter '{key}' must be a string or a number")]
    InvalidParameter { key: String },

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while processing a frame.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A required parameter was absent or blank. Carries the key.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// A referenced entity does not exist, or the peer may not act on it.
    /// Carries the name of the reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handshake failed or a command arrived before it completed.
    #[error("authentication failed")]
    Authentication,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl FederationError {
    pub(crate) fn not_found(reference: &str) -> Self {
        Self::NotFound(reference.to_string())
    }

    /// The reply code sent back for this error.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            Self::MissingParameter(_) => ReplyCode::MissingParameter,
            Self::NotFound(_) => ReplyCode::NotFound,
            Self::Authentication => ReplyCode::Unauthenticated,
            Self::Protocol(_) | Self::Store(_) => ReplyCode::Error,
        }
    }

    /// The reply message sent back for this error, if any.
    ///
    /// Authentication failures carry no detail, and store failures are
    /// reported generically.
    pub fn reply_message(&self) -> Option<String> {
        match self {
            Self::MissingParameter(key) => Some(key.clone()),
            Self::NotFound(reference) => Some(reference.clone()),
            Self::Protocol(e) => Some(e.to_string()),
            Self::Store(_) => Some("internal error".to_string()),
            Self::Authentication => None,
        }
    }

    /// Whether the connection must be dropped after replying.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Protocol(ProtocolError::FrameTooLong(_) | ProtocolError::Io(_))
        )
    }
}
