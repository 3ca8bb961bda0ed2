//! Outbound links to configured peers.

use crate::config::PeerConfig;
use crate::forward::OutboundCommand;
use crate::AppState;
use arbor_federation::PeerLink;
use arbor_store::nodes::ensure_known_node;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Capped exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

/// Records every configured peer as a known node pinned to its key.
pub fn register_peers(conn: &rusqlite::Connection, peers: &[PeerConfig]) -> Result<(), arbor_store::StoreError> {
    for peer in peers {
        let node = ensure_known_node(conn, &peer.domain, &peer.public_key)?;
        tracing::info!(peer = %node.domain, address = %peer.address, "configured peer");
    }
    Ok(())
}

/// Starts one link task per configured peer.
pub fn spawn_peer_links(state: &AppState, peers: &[PeerConfig]) -> Vec<JoinHandle<()>> {
    peers
        .iter()
        .cloned()
        .map(|peer| tokio::spawn(run_peer_link(peer, state.clone(), Backoff::default())))
        .collect()
}

/// Keeps a link to `peer` open and drains its queue, reconnecting forever.
///
/// A closed link is only noticed when a command fails on it. That command
/// is held back and sent first once the link is up again.
pub async fn run_peer_link(peer: PeerConfig, state: AppState, mut backoff: Backoff) {
    let mut pending: Option<OutboundCommand> = None;
    loop {
        let connected = PeerLink::connect(
            &peer.address,
            &state.keys,
            &state.domain,
            &peer.domain,
            state.handshake_timeout,
        )
        .await;

        match connected {
            Ok(mut link) => {
                backoff.reset();
                let mut queue = state.forwarder.attach(&peer.domain);
                loop {
                    let outbound = match pending.take() {
                        Some(outbound) => outbound,
                        None => match queue.recv().await {
                            Some(outbound) => outbound,
                            None => break,
                        },
                    };
                    if let Err(outbound) = deliver(&mut link, &peer, outbound).await {
                        pending = Some(outbound);
                        break;
                    }
                }
                state.forwarder.detach(&peer.domain);
            }
            Err(e) => {
                tracing::warn!(peer = %peer.domain, address = %peer.address, error = %e, "could not reach peer");
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!(peer = %peer.domain, delay_ms = delay.as_millis() as u64, "reconnecting later");
        tokio::time::sleep(delay).await;
    }
}

/// Sends one command. Hands it back if the link failed under it.
async fn deliver(
    link: &mut PeerLink<TcpStream>,
    peer: &PeerConfig,
    outbound: OutboundCommand,
) -> Result<(), OutboundCommand> {
    match link.send_command(&outbound.command, outbound.params.clone()).await {
        Ok(reply) if reply.is_ok() => {
            tracing::debug!(peer = %peer.domain, command = %outbound.command, "command delivered");
            Ok(())
        }
        Ok(reply) => {
            tracing::warn!(
                peer = %peer.domain,
                command = %outbound.command,
                code = %reply.code,
                message = reply.message.as_deref().unwrap_or(""),
                "peer refused command"
            );
            Ok(())
        }
        Err(e) => {
            tracing::warn!(
                peer = %peer.domain,
                command = %outbound.command,
                error = %e,
                "peer link lost, command held for retry"
            );
            Err(outbound)
        }
    }
}
