//! The feed reconciler: keeps a denormalized local feed converged with the
//! backend under interleaved page fetches and realtime changes.

use linkup_client::client::ClientError;
use linkup_common::model::Id;
use linkup_common::model::user::UserMarker;
use linkup_common::util::PageLimit;
use thiserror::Error;

pub mod cursor;
pub mod normalize;
pub mod notifications;
pub mod session;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use session::FeedSession;

pub type Result<T, E = FeedError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("A backend request failed: {0}")]
    Backend(#[from] ClientError),
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Session parameters. `author` narrows the feed to one user's posts
/// (profile view); `None` is the home feed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FeedConfig {
    pub page_size: PageLimit,
    pub author: Option<Id<UserMarker>>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: PageLimit::new_unchecked(DEFAULT_PAGE_SIZE),
            author: None,
        }
    }
}
