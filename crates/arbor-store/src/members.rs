//! Members of any tree, and the accounts that own local members.

use crate::{nodes, StoreError};
use arbor_types::EntityKind;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// A user on some tree. `username` is unique within its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub node_id: i64,
    pub username: String,
    pub name_display: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Optional display fields of a member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub name_display: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// Credentials of a user of this tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub member_id: i64,
    pub created_at: String,
}

/// Parameters for creating an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
}

const MEMBER_COLUMNS: &str =
    "id, node_id, username, name_display, description, avatar_url, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, username, password_hash, email, member_id, created_at";

fn map_row_to_member(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        node_id: row.get(1)?,
        username: row.get(2)?,
        name_display: row.get(3)?,
        description: row.get(4)?,
        avatar_url: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
        member_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts a member of the given node.
pub fn create_member(
    conn: &Connection,
    node_id: i64,
    username: &str,
    profile: &MemberProfile,
) -> Result<Member, StoreError> {
    conn.execute(
        "INSERT INTO members (node_id, username, name_display, description, avatar_url)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            node_id,
            username,
            profile.name_display,
            profile.description,
            profile.avatar_url
        ],
    )?;
    get_member(conn, conn.last_insert_rowid())
}

/// Retrieves a member by row id.
pub fn get_member(conn: &Connection, id: i64) -> Result<Member, StoreError> {
    conn.query_row(
        &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = ?1"),
        [id],
        map_row_to_member,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(EntityKind::Member, id))
}

/// Looks up a member by username within one node.
///
/// A same-named member of any other node is never returned.
pub fn find_member(
    conn: &Connection,
    node_id: i64,
    username: &str,
) -> Result<Option<Member>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE node_id = ?1 AND username = ?2"),
            params![node_id, username],
            map_row_to_member,
        )
        .optional()?)
}

/// Lists the members of a node ordered by username.
pub fn list_members(conn: &Connection, node_id: i64) -> Result<Vec<Member>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLUMNS} FROM members WHERE node_id = ?1 ORDER BY username ASC"
    ))?;
    let rows = stmt.query_map([node_id], map_row_to_member)?;
    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

/// Replaces the display fields of a member.
pub fn update_member_profile(
    conn: &Connection,
    member_id: i64,
    profile: &MemberProfile,
) -> Result<Member, StoreError> {
    let updated = conn.execute(
        "UPDATE members SET name_display = ?1, description = ?2, avatar_url = ?3,
                updated_at = datetime('now')
         WHERE id = ?4",
        params![
            profile.name_display,
            profile.description,
            profile.avatar_url,
            member_id
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found(EntityKind::Member, member_id));
    }
    get_member(conn, member_id)
}

/// Creates the member if it does not exist, otherwise refreshes its profile.
pub fn upsert_member(
    conn: &Connection,
    node_id: i64,
    username: &str,
    profile: &MemberProfile,
) -> Result<Member, StoreError> {
    match find_member(conn, node_id, username)? {
        Some(existing) => update_member_profile(conn, existing.id, profile),
        None => create_member(conn, node_id, username, profile),
    }
}

/// Creates an account together with the local member it owns.
pub fn create_account(conn: &mut Connection, account: &NewAccount) -> Result<Account, StoreError> {
    let sp = conn.savepoint()?;
    let local = nodes::local_node(&sp)?;
    let member = create_member(&sp, local.id, &account.username, &MemberProfile::default())?;
    sp.execute(
        "INSERT INTO accounts (username, password_hash, email, member_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            account.username,
            account.password_hash,
            account.email,
            member.id
        ],
    )?;
    let id = sp.last_insert_rowid();
    sp.commit()?;
    get_account(conn, id)
}

/// Retrieves an account by row id.
pub fn get_account(conn: &Connection, id: i64) -> Result<Account, StoreError> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
        [id],
        map_row_to_account,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(EntityKind::Account, id))
}

/// Looks up an account by its login name.
pub fn find_account_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<Account>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1"),
            [username],
            map_row_to_account,
        )
        .optional()?)
}

/// Updates the email address of an account.
pub fn update_account_email(
    conn: &Connection,
    account_id: i64,
    email: Option<&str>,
) -> Result<Account, StoreError> {
    let updated = conn.execute(
        "UPDATE accounts SET email = ?1 WHERE id = ?2",
        params![email, account_id],
    )?;
    if updated == 0 {
        return Err(StoreError::not_found(EntityKind::Account, account_id));
    }
    get_account(conn, account_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{nodes, test_support};

    fn new_account(username: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            email: None,
        }
    }

    #[test]
    fn account_owns_a_local_member() {
        let mut conn = test_support::open();
        let local = nodes::ensure_local_node(&conn, "home.example", "aa").unwrap();

        let account = create_account(&mut conn, &new_account("alice")).unwrap();
        let member = get_member(&conn, account.member_id).unwrap();

        assert_eq!(member.node_id, local.id);
        assert_eq!(member.username, "alice");
        assert_eq!(
            find_account_by_username(&conn, "alice").unwrap().map(|a| a.id),
            Some(account.id)
        );
    }

    #[test]
    fn create_account_without_local_node_leaves_nothing_behind() {
        let mut conn = test_support::open();
        let err = create_account(&mut conn, &new_account("alice")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let members: i64 = conn
            .query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))
            .unwrap();
        assert_eq!(members, 0);
    }

    #[test]
    fn usernames_are_scoped_per_node() {
        let conn = test_support::open();
        let home = nodes::ensure_local_node(&conn, "home.example", "aa").unwrap();
        let peer = nodes::ensure_known_node(&conn, "peer.example", "bb").unwrap();

        let ours = create_member(&conn, home.id, "sam", &MemberProfile::default()).unwrap();
        let theirs = create_member(&conn, peer.id, "sam", &MemberProfile::default()).unwrap();
        assert_ne!(ours.id, theirs.id);

        assert_eq!(find_member(&conn, peer.id, "sam").unwrap(), Some(theirs));
        assert!(create_member(&conn, peer.id, "sam", &MemberProfile::default()).is_err());
    }

    #[test]
    fn upsert_member_updates_profile_in_place() {
        let conn = test_support::open();
        let peer = nodes::ensure_known_node(&conn, "peer.example", "bb").unwrap();

        let first = upsert_member(&conn, peer.id, "kim", &MemberProfile::default()).unwrap();
        let profile = MemberProfile {
            name_display: Some("Kim".into()),
            ..MemberProfile::default()
        };
        let second = upsert_member(&conn, peer.id, "kim", &profile).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name_display.as_deref(), Some("Kim"));
        assert_eq!(list_members(&conn, peer.id).unwrap().len(), 1);
    }
}
