//! Fan-out of locally originated commands to connected peers.

use arbor_federation::Params;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Commands a link may have queued before new ones are dropped.
pub const QUEUE_DEPTH: usize = 256;

/// A command waiting to be sent to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub command: String,
    pub params: Params,
}

/// Registry of outbound link queues, keyed by peer domain.
///
/// Uses `std::sync::RwLock`: every acquisition is a short map operation that
/// never spans an `.await`.
#[derive(Debug, Clone, Default)]
pub struct Forwarder {
    links: Arc<RwLock<HashMap<String, mpsc::Sender<OutboundCommand>>>>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live link to `domain` and returns its queue. A previous
    /// queue for the same domain is replaced.
    pub fn attach(&self, domain: &str) -> mpsc::Receiver<OutboundCommand> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        self.links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain.to_string(), tx);
        tracing::debug!(peer = domain, "outbound link attached");
        rx
    }

    pub fn detach(&self, domain: &str) {
        self.links
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(domain);
        tracing::debug!(peer = domain, "outbound link detached");
    }

    /// Domains with a live link, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut domains: Vec<_> = self
            .links
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        domains.sort();
        domains
    }

    /// Queues `command` on every live link and returns how many accepted it.
    ///
    /// A full queue drops the command for that peer.
    pub fn broadcast(&self, command: &str, params: Params) -> usize {
        let outbound = OutboundCommand {
            command: command.to_string(),
            params,
        };
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        let mut queued = 0;
        for (domain, tx) in links.iter() {
            match tx.try_send(outbound.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(peer = %domain, command, "outbound queue full, dropping command");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(peer = %domain, command, "outbound link gone");
                }
            }
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_attached_link() {
        let forwarder = Forwarder::new();
        let mut birch = forwarder.attach("birch.example");
        let mut elm = forwarder.attach("elm.example");

        let queued = forwarder.broadcast("member", Params::new().with("username", "ana"));
        assert_eq!(queued, 2);
        assert_eq!(birch.try_recv().unwrap().command, "member");
        assert_eq!(elm.try_recv().unwrap().params.text("username").as_deref(), Some("ana"));
        assert_eq!(forwarder.peers(), vec!["birch.example", "elm.example"]);
    }

    #[test]
    fn detached_and_full_links_receive_nothing() {
        let forwarder = Forwarder::new();
        let _full = forwarder.attach("birch.example");
        for _ in 0..QUEUE_DEPTH {
            forwarder.broadcast("member", Params::new());
        }
        assert_eq!(forwarder.broadcast("member", Params::new()), 0);

        forwarder.detach("birch.example");
        assert!(forwarder.peers().is_empty());
        assert_eq!(forwarder.broadcast("member", Params::new()), 0);
    }
}
