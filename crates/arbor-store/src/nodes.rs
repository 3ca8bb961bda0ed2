//! Trees of the forest, including the row describing this tree.

use crate::{label_error, StoreError};
use arbor_types::{EntityKind, TrustState};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A tree known to this store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    /// Domain name; the node's identity in the forest.
    pub domain: String,
    /// Hex-encoded Ed25519 verifying key, pinned at first sight.
    pub public_key: String,
    pub trust: TrustState,
    /// Whether this row describes the tree running this store.
    pub is_local: bool,
    pub created_at: String,
}

/// Parameters for creating a node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub domain: String,
    pub public_key: String,
    pub trust: TrustState,
    pub is_local: bool,
}

const NODE_COLUMNS: &str = "id, domain, public_key, trust, is_local, created_at";

fn map_row_to_node(row: &Row) -> rusqlite::Result<Node> {
    let trust: String = row.get(3)?;
    Ok(Node {
        id: row.get(0)?,
        domain: row.get(1)?,
        public_key: row.get(2)?,
        trust: trust.parse().map_err(|e| label_error(3, e))?,
        is_local: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts a node row.
pub fn create_node(conn: &Connection, node: &NewNode) -> Result<Node, StoreError> {
    conn.execute(
        "INSERT INTO nodes (domain, public_key, trust, is_local) VALUES (?1, ?2, ?3, ?4)",
        params![
            node.domain,
            node.public_key,
            node.trust.as_str(),
            node.is_local
        ],
    )?;
    get_node(conn, conn.last_insert_rowid())
}

/// Retrieves a node by row id.
pub fn get_node(conn: &Connection, id: i64) -> Result<Node, StoreError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
        [id],
        map_row_to_node,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(EntityKind::Node, id))
}

/// Looks up a node by its domain.
pub fn find_node_by_domain(conn: &Connection, domain: &str) -> Result<Option<Node>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE domain = ?1"),
            [domain],
            map_row_to_node,
        )
        .optional()?)
}

/// Returns the row describing this tree.
pub fn local_node(conn: &Connection) -> Result<Node, StoreError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE is_local = 1"),
        [],
        map_row_to_node,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(EntityKind::Node, "local"))
}

/// Lists every node, local first, then by domain.
pub fn list_nodes(conn: &Connection) -> Result<Vec<Node>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes ORDER BY is_local DESC, domain ASC"
    ))?;
    let rows = stmt.query_map([], map_row_to_node)?;
    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row?);
    }
    Ok(nodes)
}

/// Creates or refreshes the row describing this tree.
///
/// Called at startup with the configured domain and the public half of the
/// loaded keypair, so a key rotation or domain change on this tree is
/// reflected immediately.
pub fn ensure_local_node(
    conn: &Connection,
    domain: &str,
    public_key: &str,
) -> Result<Node, StoreError> {
    let updated = conn.execute(
        "UPDATE nodes SET domain = ?1, public_key = ?2, trust = 'known' WHERE is_local = 1",
        params![domain, public_key],
    )?;
    if updated == 0 {
        create_node(
            conn,
            &NewNode {
                domain: domain.to_string(),
                public_key: public_key.to_string(),
                trust: TrustState::Known,
                is_local: true,
            },
        )?;
        tracing::info!(domain, "registered local node");
    }
    local_node(conn)
}

/// Records an operator-configured peer as `Known` with the given key.
///
/// Configuration is an explicit trust decision, so a configured key replaces
/// whatever key was pinned before.
pub fn ensure_known_node(
    conn: &Connection,
    domain: &str,
    public_key: &str,
) -> Result<Node, StoreError> {
    match find_node_by_domain(conn, domain)? {
        Some(node) if node.is_local => Ok(node),
        Some(node) => {
            if node.public_key != public_key {
                tracing::warn!(domain, "configured key differs from pinned key, replacing");
            }
            conn.execute(
                "UPDATE nodes SET public_key = ?1, trust = 'known' WHERE id = ?2",
                params![public_key, node.id],
            )?;
            get_node(conn, node.id)
        }
        None => create_node(
            conn,
            &NewNode {
                domain: domain.to_string(),
                public_key: public_key.to_string(),
                trust: TrustState::Known,
                is_local: false,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn ensure_local_node_is_idempotent() {
        let conn = test_support::open();
        let first = ensure_local_node(&conn, "home.example", "aa").unwrap();
        let second = ensure_local_node(&conn, "home.example", "bb").unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.is_local);
        assert_eq!(second.public_key, "bb");
        assert_eq!(list_nodes(&conn).unwrap().len(), 1);
    }

    #[test]
    fn ensure_known_node_promotes_unknown_node() {
        let conn = test_support::open();
        let created = create_node(
            &conn,
            &NewNode {
                domain: "peer.example".into(),
                public_key: "aa".into(),
                trust: TrustState::Unknown,
                is_local: false,
            },
        )
        .unwrap();

        let known = ensure_known_node(&conn, "peer.example", "cc").unwrap();
        assert_eq!(known.id, created.id);
        assert_eq!(known.trust, TrustState::Known);
        assert_eq!(known.public_key, "cc");
    }

    #[test]
    fn missing_node_lookups() {
        let conn = test_support::open();
        assert!(find_node_by_domain(&conn, "nowhere.example").unwrap().is_none());
        assert!(matches!(
            local_node(&conn),
            Err(StoreError::NotFound {
                kind: EntityKind::Node,
                ..
            })
        ));
    }
}
