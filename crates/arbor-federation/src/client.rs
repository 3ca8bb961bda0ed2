//! Outbound side of a federation connection.

use crate::codec::{Frame, FrameCodec, Params};
use crate::error::{FederationError, ProtocolError};
use crate::keys::KeyStore;
use arbor_types::ReplyCode;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

/// A peer's answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    pub message: Option<String>,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        self.code == ReplyCode::Ok
    }
}

/// An authenticated connection to another tree.
///
/// Commands are sent one at a time; each call waits for its reply.
#[derive(Debug)]
pub struct PeerLink<S> {
    framed: Framed<S, FrameCodec>,
    remote_domain: String,
    reply_timeout: Duration,
}

impl PeerLink<TcpStream> {
    /// Connects to `address` and authenticates as `local_domain`.
    pub async fn connect(
        address: &str,
        keys: &KeyStore,
        local_domain: &str,
        remote_domain: &str,
        timeout: Duration,
    ) -> Result<Self, FederationError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ProtocolError::Io(std::io::ErrorKind::TimedOut.into()))?
            .map_err(ProtocolError::Io)?;
        stream.set_nodelay(true).map_err(ProtocolError::Io)?;
        Self::handshake(stream, keys, local_domain, remote_domain, timeout).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerLink<S> {
    /// Runs the initiator side of the handshake over an open stream.
    pub async fn handshake(
        stream: S,
        keys: &KeyStore,
        local_domain: &str,
        remote_domain: &str,
        timeout: Duration,
    ) -> Result<Self, FederationError> {
        let mut link = Self {
            framed: Framed::new(stream, FrameCodec::new()),
            remote_domain: remote_domain.to_string(),
            reply_timeout: timeout,
        };

        link.send(Frame::Introduce {
            public_key: keys.public_key_hex(),
            domain: local_domain.to_string(),
        })
        .await?;
        let nonce = match link.receive().await? {
            Frame::Challenge { nonce } => hex::decode(&nonce).map_err(|_| {
                ProtocolError::InvalidParameter {
                    key: "nonce".to_string(),
                }
            })?,
            Frame::Reply { code, .. } => {
                tracing::warn!(peer = remote_domain, %code, "introduction refused");
                return Err(FederationError::Authentication);
            }
            other => return Err(ProtocolError::UnexpectedFrame(other.kind()).into()),
        };

        link.send(Frame::Authenticate {
            signature: keys.prove(&nonce, local_domain, remote_domain),
        })
        .await?;
        match link.receive().await? {
            Frame::Reply {
                code: ReplyCode::Ok,
                ..
            } => {
                tracing::info!(peer = remote_domain, "authenticated to peer");
                Ok(link)
            }
            Frame::Reply { code, .. } => {
                tracing::warn!(peer = remote_domain, %code, "peer rejected our proof");
                Err(FederationError::Authentication)
            }
            other => Err(ProtocolError::UnexpectedFrame(other.kind()).into()),
        }
    }

    pub fn remote_domain(&self) -> &str {
        &self.remote_domain
    }

    /// Sends one command and waits for its reply.
    ///
    /// A refusal by the peer is returned as a [`Reply`], not an error;
    /// errors mean the link itself is unusable.
    pub async fn send_command(
        &mut self,
        command: &str,
        params: Params,
    ) -> Result<Reply, FederationError> {
        self.send(Frame::command(command, params)).await?;
        match self.receive().await? {
            Frame::Reply { code, message } => Ok(Reply { code, message }),
            other => Err(ProtocolError::UnexpectedFrame(other.kind()).into()),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), FederationError> {
        self.framed.send(frame).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame, FederationError> {
        let next = tokio::time::timeout(self.reply_timeout, self.framed.next())
            .await
            .map_err(|_| ProtocolError::Io(std::io::ErrorKind::TimedOut.into()))?;
        match next {
            Some(Ok(frame)) => Ok(frame?),
            Some(Err(e)) => Err(e.into()),
            None => Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()).into()),
        }
    }
}
