//! Responders for every federation command.
//!
//! | command            | required keys                              |
//! |--------------------|--------------------------------------------|
//! | `member`           | username                                   |
//! | `post`             | username, id, text                         |
//! | `post-delete`      | id                                         |
//! | `comment`          | username, id, post_id, origin, text        |
//! | `comment-delete`   | id                                         |
//! | `like`             | username, id, post_id, origin              |
//! | `like-delete`      | id                                         |
//! | `pool`             | username, id, name                         |
//! | `pool-delete`      | username, id                               |
//! | `pool-post`        | username, pool_id, post_id, origin         |
//! | `pool-post-delete` | username, pool_id, post_id, origin         |

mod comment;
mod like;
mod member;
mod pool;
mod post;

pub use comment::{CommentDeleteResponder, CommentResponder};
pub use like::{LikeDeleteResponder, LikeResponder};
pub use member::MemberResponder;
pub use pool::{PoolDeleteResponder, PoolPostDeleteResponder, PoolPostResponder, PoolResponder};
pub use post::{PostDeleteResponder, PostResponder};

use crate::dispatch::Dispatcher;

pub(crate) fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher
        .register::<MemberResponder>()
        .register::<PostResponder>()
        .register::<PostDeleteResponder>()
        .register::<CommentResponder>()
        .register::<CommentDeleteResponder>()
        .register::<LikeResponder>()
        .register::<LikeDeleteResponder>()
        .register::<PoolResponder>()
        .register::<PoolDeleteResponder>()
        .register::<PoolPostResponder>()
        .register::<PoolPostDeleteResponder>();
}
