//! Actions taken by users of this tree.
//!
//! Each action writes through `arbor-store` exactly as a responder would,
//! then queues the matching federation command for every connected peer.
//! Content is announced under its local row id, which is the id peers store
//! as its remote id. Removing an account is the one change peers are not
//! told about: there is no command for it, so their replicas remain.

use crate::forward::Forwarder;
use arbor_db::DbPool;
use arbor_federation::Params;
use arbor_store::content::{
    create_comment, create_post, find_member_like, get_comment, get_post, public_reference,
    upsert_like,
};
use arbor_store::members::{create_account, get_account, get_member, update_member_profile};
use arbor_store::pools::{add_post_to_pool, create_pool, get_pool, remove_post_from_pool};
use arbor_store::{
    delete_cascade, Account, CascadeReport, Comment, EntityRef, Like, Member, MemberProfile,
    NewAccount, NewComment, NewPool, NewPost, Pool, Post, StoreError,
};
use arbor_types::{EntityKind, Visibility};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The account does not own the entity it tried to change.
    #[error("account {account_id} does not own {kind} {id}")]
    NotOwner {
        account_id: i64,
        kind: EntityKind,
        id: i64,
    },
}

/// Entry point for local users' actions.
#[derive(Debug, Clone)]
pub struct LocalTree {
    pool: DbPool,
    forwarder: Forwarder,
}

impl LocalTree {
    pub fn new(pool: DbPool, forwarder: Forwarder) -> Self {
        Self { pool, forwarder }
    }

    fn author(&self, conn: &rusqlite::Connection, account_id: i64) -> Result<Member, LocalError> {
        let account = get_account(conn, account_id)?;
        Ok(get_member(conn, account.member_id)?)
    }

    fn announce(&self, command: &str, params: Params) {
        let queued = self.forwarder.broadcast(command, params);
        tracing::debug!(command, queued, "announced local change");
    }

    /// Registers an account and announces its member.
    pub fn register(&self, account: &NewAccount) -> Result<Account, LocalError> {
        let mut conn = self.pool.get()?;
        let account = create_account(&mut conn, account)?;
        tracing::info!(username = %account.username, "account registered");
        self.announce("member", Params::new().with("username", account.username.as_str()));
        Ok(account)
    }

    pub fn update_profile(
        &self,
        account_id: i64,
        profile: &MemberProfile,
    ) -> Result<Member, LocalError> {
        let conn = self.pool.get()?;
        let member = self.author(&conn, account_id)?;
        let member = update_member_profile(&conn, member.id, profile)?;
        let mut params = Params::new().with("username", member.username.as_str());
        for (key, value) in [
            ("name_display", &member.name_display),
            ("description", &member.description),
            ("avatar_url", &member.avatar_url),
        ] {
            if let Some(value) = value {
                params.insert(key, value.as_str());
            }
        }
        self.announce("member", params);
        Ok(member)
    }

    pub fn write_post(
        &self,
        account_id: i64,
        text: &str,
        visibility: Visibility,
    ) -> Result<Post, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let post = create_post(
            &conn,
            &NewPost {
                member_id: author.id,
                remote_id: None,
                text: text.to_string(),
                visibility,
            },
        )?;
        // Tree-only posts stay on this tree.
        if visibility != Visibility::Tree {
            self.announce(
                "post",
                Params::new()
                    .with("username", author.username.as_str())
                    .with("id", post.id)
                    .with("text", post.text.as_str())
                    .with("visibility", visibility.as_str()),
            );
        }
        Ok(post)
    }

    /// Deletes one of the account's posts with everything hanging off it.
    pub fn delete_post(&self, account_id: i64, post_id: i64) -> Result<CascadeReport, LocalError> {
        let mut conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let post = get_post(&conn, post_id)?;
        if post.member_id != author.id {
            return Err(LocalError::NotOwner {
                account_id,
                kind: EntityKind::Post,
                id: post_id,
            });
        }
        let report = delete_cascade(&mut conn, EntityRef::Post(post.id))?;
        self.announce("post-delete", Params::new().with("id", post.id));
        Ok(report)
    }

    pub fn comment(&self, account_id: i64, post_id: i64, text: &str) -> Result<Comment, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let post = get_post(&conn, post_id)?;
        let comment = create_comment(
            &conn,
            &NewComment {
                member_id: author.id,
                post_id: post.id,
                remote_id: None,
                text: text.to_string(),
            },
        )?;
        let (origin, public_id) = public_reference(&conn, &post)?;
        self.announce(
            "comment",
            Params::new()
                .with("username", author.username.as_str())
                .with("id", comment.id)
                .with("post_id", public_id)
                .with("origin", origin)
                .with("text", comment.text.as_str()),
        );
        Ok(comment)
    }

    pub fn like(&self, account_id: i64, post_id: i64) -> Result<Like, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let post = get_post(&conn, post_id)?;
        let like = upsert_like(&conn, author.id, post.id, None)?;
        let (origin, public_id) = public_reference(&conn, &post)?;
        self.announce(
            "like",
            Params::new()
                .with("username", author.username.as_str())
                .with("id", like.id)
                .with("post_id", public_id)
                .with("origin", origin),
        );
        Ok(like)
    }

    pub fn create_pool(&self, account_id: i64, name: &str, sprung: bool) -> Result<Pool, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let pool = create_pool(
            &conn,
            &NewPool {
                member_id: author.id,
                remote_id: None,
                name: name.to_string(),
                sprung,
            },
        )?;
        self.announce(
            "pool",
            Params::new()
                .with("username", author.username.as_str())
                .with("id", pool.id)
                .with("name", pool.name.as_str())
                .with("sprung", if sprung { "1" } else { "0" }),
        );
        Ok(pool)
    }

    /// A pool of the account's member, or `NotOwner`.
    fn owned_pool(
        &self,
        conn: &rusqlite::Connection,
        account_id: i64,
        author: &Member,
        pool_id: i64,
    ) -> Result<Pool, LocalError> {
        let pool = get_pool(conn, pool_id)?;
        if pool.member_id != author.id {
            return Err(LocalError::NotOwner {
                account_id,
                kind: EntityKind::Pool,
                id: pool_id,
            });
        }
        Ok(pool)
    }

    /// Adds any post this tree knows of to one of the account's pools.
    pub fn pool_post(&self, account_id: i64, pool_id: i64, post_id: i64) -> Result<bool, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let pool = self.owned_pool(&conn, account_id, &author, pool_id)?;
        let post = get_post(&conn, post_id)?;
        let added = add_post_to_pool(&conn, pool.id, post.id)?;
        let (origin, public_id) = public_reference(&conn, &post)?;
        self.announce(
            "pool-post",
            Params::new()
                .with("username", author.username.as_str())
                .with("pool_id", pool.id)
                .with("post_id", public_id)
                .with("origin", origin),
        );
        Ok(added)
    }

    pub fn remove_pool_post(
        &self,
        account_id: i64,
        pool_id: i64,
        post_id: i64,
    ) -> Result<bool, LocalError> {
        let conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let pool = self.owned_pool(&conn, account_id, &author, pool_id)?;
        let post = get_post(&conn, post_id)?;
        let removed = remove_post_from_pool(&conn, pool.id, post.id)?;
        let (origin, public_id) = public_reference(&conn, &post)?;
        self.announce(
            "pool-post-delete",
            Params::new()
                .with("username", author.username.as_str())
                .with("pool_id", pool.id)
                .with("post_id", public_id)
                .with("origin", origin),
        );
        Ok(removed)
    }

    pub fn delete_pool(&self, account_id: i64, pool_id: i64) -> Result<CascadeReport, LocalError> {
        let mut conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let pool = self.owned_pool(&conn, account_id, &author, pool_id)?;
        let report = delete_cascade(&mut conn, EntityRef::Pool(pool.id))?;
        self.announce(
            "pool-delete",
            Params::new()
                .with("username", author.username.as_str())
                .with("id", pool.id),
        );
        Ok(report)
    }

    pub fn delete_comment(
        &self,
        account_id: i64,
        comment_id: i64,
    ) -> Result<CascadeReport, LocalError> {
        let mut conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let comment = get_comment(&conn, comment_id)?;
        if comment.member_id != author.id {
            return Err(LocalError::NotOwner {
                account_id,
                kind: EntityKind::Comment,
                id: comment_id,
            });
        }
        let report = delete_cascade(&mut conn, EntityRef::Comment(comment.id))?;
        self.announce("comment-delete", Params::new().with("id", comment.id));
        Ok(report)
    }

    /// Withdraws the account's like of a post. Returns `false` if there was
    /// none, in which case nothing is announced.
    pub fn unlike(&self, account_id: i64, post_id: i64) -> Result<bool, LocalError> {
        let mut conn = self.pool.get()?;
        let author = self.author(&conn, account_id)?;
        let Some(like) = find_member_like(&conn, author.id, post_id)? else {
            return Ok(false);
        };
        delete_cascade(&mut conn, EntityRef::Like(like.id))?;
        self.announce("like-delete", Params::new().with("id", like.id));
        Ok(true)
    }

    /// Removes an account and everything its member authored.
    ///
    /// There is no federation command for this; peers keep their replicas.
    pub fn delete_account(&self, account_id: i64) -> Result<CascadeReport, LocalError> {
        let mut conn = self.pool.get()?;
        let report = delete_cascade(&mut conn, EntityRef::Account(account_id))?;
        tracing::info!(account_id, removed = report.total(), "account deleted");
        Ok(report)
    }
}
