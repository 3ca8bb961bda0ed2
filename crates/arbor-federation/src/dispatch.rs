//! Command registry.
//!
//! Each command is a [`Responder`]: it names its required keys, resolves
//! its references through [`crate::validate`], and only then writes. The
//! dispatcher runs those stages in that order, so a responder's write step
//! never sees unvalidated input.

use crate::codec::Params;
use crate::error::{FederationError, ProtocolError};
use crate::responders;
use crate::validate;
use arbor_store::Node;
use rusqlite::Connection;
use std::collections::HashMap;
use std::marker::PhantomData;

/// A federation command.
pub trait Responder {
    /// Wire name of the command.
    const COMMAND: &'static str;

    /// Keys that must be present and non-blank, in reporting order.
    const REQUIRED: &'static [&'static str];

    /// Everything the write step needs, already resolved.
    type Input;

    /// Resolves references against the store on behalf of `peer`.
    fn resolve(conn: &Connection, params: &Params, peer: &Node)
        -> Result<Self::Input, FederationError>;

    /// Applies the command.
    fn respond(conn: &mut Connection, input: Self::Input) -> Result<(), FederationError>;
}

/// Object-safe face of a registered command.
pub trait Handler: Send + Sync {
    fn required(&self) -> &'static [&'static str];

    fn handle(
        &self,
        conn: &mut Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<(), FederationError>;
}

struct Registered<R>(PhantomData<fn() -> R>);

impl<R: Responder> Handler for Registered<R> {
    fn required(&self) -> &'static [&'static str] {
        R::REQUIRED
    }

    fn handle(
        &self,
        conn: &mut Connection,
        params: &Params,
        peer: &Node,
    ) -> Result<(), FederationError> {
        validate::require_params(params, R::REQUIRED)?;
        let input = R::resolve(conn, params, peer)?;
        R::respond(conn, input)
    }
}

/// Maps command names to their handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher answering every command this crate implements.
    pub fn with_default_responders() -> Self {
        let mut dispatcher = Self::new();
        responders::register_all(&mut dispatcher);
        dispatcher
    }

    /// Registers `R`, replacing any handler with the same name.
    pub fn register<R: Responder + 'static>(&mut self) -> &mut Self {
        self.handlers
            .insert(R::COMMAND, Box::new(Registered::<R>(PhantomData)));
        self
    }

    pub fn supports(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Required keys of `command`, if it is registered.
    pub fn required(&self, command: &str) -> Option<&'static [&'static str]> {
        self.handlers.get(command).map(|h| h.required())
    }

    /// Runs `command` for an authenticated peer.
    pub fn dispatch(
        &self,
        conn: &mut Connection,
        command: &str,
        params: &Params,
        peer: &Node,
    ) -> Result<(), FederationError> {
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| ProtocolError::UnsupportedCommand(command.to_string()))?;
        let result = handler.handle(conn, params, peer);
        match &result {
            Ok(()) => tracing::debug!(command, peer = %peer.domain, "command applied"),
            Err(e) => tracing::debug!(command, peer = %peer.domain, error = %e, "command refused"),
        }
        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.commands())
            .finish()
    }
}
