//! Arbor tree server library logic.
//!
//! Accepts federation connections, keeps outbound links to configured peers,
//! and exposes the local actions whose results are propagated to them.

pub mod config;
pub mod forward;
pub mod listener;
pub mod local;
pub mod peers;

use arbor_db::DbPool;
use arbor_federation::{Dispatcher, KeyStore};
use forward::Forwarder;
use std::sync::Arc;
use std::time::Duration;

/// State shared by every connection and peer link.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Domain of this tree.
    pub domain: String,
    /// This tree's signing key.
    pub keys: Arc<KeyStore>,
    /// Responders for inbound commands.
    pub dispatcher: Arc<Dispatcher>,
    /// Deadline for inbound handshakes; also bounds outbound connect and
    /// reply waits.
    pub handshake_timeout: Duration,
    /// Queues to live outbound peer links.
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        domain: impl Into<String>,
        keys: KeyStore,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            domain: domain.into(),
            keys: Arc::new(keys),
            dispatcher: Arc::new(Dispatcher::with_default_responders()),
            handshake_timeout,
            forwarder: Forwarder::new(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("domain", &self.domain)
            .field("keys", &self.keys)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}
