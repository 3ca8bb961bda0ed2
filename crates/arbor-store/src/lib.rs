//! Entity persistence for an Arbor tree.
//!
//! Implements create/find/update for nodes, members, accounts, posts,
//! comments, likes, pools and pool memberships, the lookups that resolve a
//! `(remote id, origin node)` reference to a local row, and the cascading
//! delete engine.
//!
//! Every function takes a plain `rusqlite::Connection`, so the same calls
//! serve the local front end and the federation responders. Functions that
//! must be atomic across several statements take `&mut Connection` and open
//! a savepoint.

use arbor_types::EntityKind;
use thiserror::Error;

pub mod cascade;
pub mod content;
pub mod members;
pub mod nodes;
pub mod pools;

pub use cascade::{delete_cascade, CascadeReport, EntityRef};
pub use content::{Comment, Like, NewComment, NewPost, Post};
pub use members::{Account, Member, MemberProfile, NewAccount};
pub use nodes::{NewNode, Node};
pub use pools::{NewPool, Pool, PoolPost};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A statement inside a cascading delete failed; the whole cascade was
    /// rolled back.
    #[error("cascade delete failed while removing {entity} rows: {source}")]
    Transaction {
        entity: EntityKind,
        #[source]
        source: rusqlite::Error,
    },

    #[error("the local node cannot be deleted")]
    LocalNode,
}

impl StoreError {
    pub(crate) fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Maps a label column that failed to parse into a rusqlite conversion error.
pub(crate) fn label_error(
    index: usize,
    err: arbor_types::ParseLabelError,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}
