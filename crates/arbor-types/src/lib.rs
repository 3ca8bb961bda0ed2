//! Shared types and constants for the Arbor federation engine.
//!
//! This crate provides the small vocabulary every other Arbor crate speaks:
//! node trust states, post visibility, entity kinds used by the cascade
//! engine, and the reply codes sent back over the wire.
//!
//! No crate in the workspace depends on anything *except* `arbor-types` for
//! cross-cutting type definitions, which keeps the dependency graph acyclic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Port a tree listens on when none is configured.
pub const DEFAULT_PORT: u16 = 14404;

/// Error returned when a stored or received label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind}: {value}")]
pub struct ParseLabelError {
    /// What was being parsed (e.g. "trust state").
    pub kind: &'static str,
    /// The offending input.
    pub value: String,
}

/// Trust decision recorded for a remote node.
///
/// A node is `Known` when an operator configured it (domain plus pinned
/// key). A node that authenticated on its own, without prior configuration,
/// is recorded as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustState {
    Known,
    Unknown,
}

impl TrustState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Known => "known",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustState {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "known" => Ok(Self::Known),
            "unknown" => Ok(Self::Unknown),
            other => Err(ParseLabelError {
                kind: "trust state",
                value: other.to_string(),
            }),
        }
    }
}

/// Audience of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to members of every federated tree.
    #[default]
    Forest,
    /// Visible only on the tree where it was written.
    Tree,
    /// Publicly visible, including to visitors without an account.
    Internet,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forest => "forest",
            Self::Tree => "tree",
            Self::Internet => "internet",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forest" => Ok(Self::Forest),
            "tree" => Ok(Self::Tree),
            "internet" => Ok(Self::Internet),
            other => Err(ParseLabelError {
                kind: "visibility",
                value: other.to_string(),
            }),
        }
    }
}

/// Persisted entity kinds, as named in cascade reports and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Account,
    Member,
    Post,
    Comment,
    Like,
    Pool,
    PoolPost,
}

impl EntityKind {
    /// Returns the lowercase label for this kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Account => "account",
            Self::Member => "member",
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Like => "like",
            Self::Pool => "pool",
            Self::PoolPost => "pool_post",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome code carried by every `reply` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyCode {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "MISSING PARAMETER")]
    MissingParameter,
    #[serde(rename = "NOT FOUND")]
    NotFound,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
}

impl ReplyCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::MissingParameter => "MISSING PARAMETER",
            Self::NotFound => "NOT FOUND",
            Self::Error => "ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
