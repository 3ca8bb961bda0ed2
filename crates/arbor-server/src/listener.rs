//! Inbound federation connections.
//!
//! Every accepted socket gets its own task and [`Session`]. Frames on one
//! connection are handled strictly in order, and each is dispatched to
//! completion before the next is read. Errors are turned into replies here
//! and never reach the accept loop.

use crate::AppState;
use arbor_federation::{FederationError, Frame, FrameCodec, ProtocolError, Session, SessionState};
use arbor_types::ReplyCode;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::Instrument;
use uuid::Uuid;

/// Pause after a failed `accept`, so a persistent failure does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts connections until `shutdown` resolves.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "could not set TCP_NODELAY");
                    }
                    let state = state.clone();
                    let connection_id = Uuid::new_v4();
                    let span = tracing::info_span!("connection", %connection_id, remote = %addr);
                    tokio::spawn(handle_connection(stream, state).instrument(span));
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
    tracing::info!("listener stopped");
}

/// Runs one connection to its end.
pub async fn handle_connection<S>(stream: S, state: AppState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut session = Session::new(state.domain.clone());
    let deadline = Instant::now() + state.handshake_timeout;
    tracing::info!("connection opened");

    loop {
        let next = if session.is_authenticated() {
            framed.next().await
        } else {
            match tokio::time::timeout_at(deadline, framed.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!("handshake timed out");
                    break;
                }
            }
        };

        let item = match next {
            None => break,
            Some(Err(e)) => {
                let err = FederationError::from(e);
                if !matches!(err, FederationError::Protocol(ProtocolError::Io(_))) {
                    let _ = framed.send(Frame::error_reply(&err)).await;
                }
                tracing::warn!(error = %err, "dropping connection");
                break;
            }
            Some(Ok(item)) => item,
        };

        let (reply, close) = process(&state, &mut session, item);
        if let Err(e) = framed.send(reply).await {
            tracing::warn!(error = %e, "failed to write reply");
            break;
        }
        if close {
            break;
        }
    }

    let peer = session.peer().map(|p| p.domain.clone());
    session.close();
    tracing::info!(peer = peer.as_deref().unwrap_or("<unauthenticated>"), "connection closed");
}

/// Handles one decoded line. Returns the reply and whether to hang up.
fn process(
    state: &AppState,
    session: &mut Session,
    item: Result<Frame, ProtocolError>,
) -> (Frame, bool) {
    let frame = match item {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable frame");
            return (Frame::error_reply(&e.into()), false);
        }
    };
    let label = match &frame {
        Frame::Command { command, .. } => command.clone(),
        other => other.kind().to_string(),
    };

    let mut conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, frame = %label, "no database connection available");
            let reply = Frame::Reply {
                code: ReplyCode::Error,
                message: Some("internal error".to_string()),
            };
            return (reply, false);
        }
    };

    match session.handle_frame(&mut conn, &state.dispatcher, frame) {
        Ok(reply) => (reply, false),
        Err(e) => {
            let peer = session.peer().map(|p| p.domain.as_str()).unwrap_or("-");
            match &e {
                FederationError::Store(_) => {
                    tracing::error!(peer, frame = %label, error = %e, "store failure")
                }
                _ => tracing::warn!(peer, frame = %label, code = %e.reply_code(), error = %e, "frame refused"),
            }
            let close = e.closes_connection() || session.state() == SessionState::Closed;
            (Frame::error_reply(&e), close)
        }
    }
}
