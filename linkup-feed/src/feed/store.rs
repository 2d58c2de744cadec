//! The denormalized feed: an ordered collection of post aggregates kept
//! consistent under interleaved bulk fetches and realtime changes.

use linkup_common::change::ChangeDescriptor;
use linkup_common::model::Id;
use linkup_common::model::post::{Post, PostMarker};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Ordered sequence of post aggregates, most recent first, unique per post
/// id. Every successful mutation republishes the snapshot on a watch
/// channel for the presentation layer.
///
/// Bulk fetches and realtime changes may arrive in either order; both
/// application paths merge keyed on id, so any interleaving converges on
/// the same final state.
pub struct FeedStore {
    posts: Vec<Post>,
    snapshot_tx: watch::Sender<Arc<[Post]>>,
}

impl FeedStore {
    #[must_use]
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::from([]));
        Self {
            posts: Vec::new(),
            snapshot_tx,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<[Post]> {
        self.snapshot_tx.borrow().clone()
    }

    /// A receiver that yields the updated snapshot after every applied
    /// change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<[Post]>> {
        self.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Merges an authoritative page into the feed.
    ///
    /// Aggregates already held are merged field-wise, keeping any comments
    /// and likes accumulated from the realtime stream; new aggregates are
    /// inserted. The result is re-sorted by creation time descending, so
    /// pages may arrive in any order.
    pub fn apply_bulk(&mut self, page: Vec<Post>) {
        for incoming in page {
            match self.posts.iter_mut().find(|held| held.id == incoming.id) {
                Some(held) => held.merge_authoritative(incoming),
                None => self.posts.push(incoming),
            }
        }
        self.posts
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.publish();
    }

    /// Applies one normalized change. Re-applying the same descriptor is a
    /// no-op, and a change targeting a post that is not loaded is silently
    /// ignored (the relevant page simply has not been fetched).
    ///
    /// Returns whether the feed changed.
    pub fn apply_change(&mut self, descriptor: ChangeDescriptor) -> bool {
        let changed = match descriptor {
            ChangeDescriptor::PostInserted(post) => self.insert_post(post),
            ChangeDescriptor::PostUpdated { id, body, file } => {
                self.with_post(id, |post| {
                    post.body = body;
                    post.file = file;
                })
                .is_some()
            }
            ChangeDescriptor::PostDeleted { id } => {
                let before = self.posts.len();
                self.posts.retain(|post| post.id != id);
                self.posts.len() != before
            }
            ChangeDescriptor::CommentInserted(comment) => self
                .with_post(comment.post_id, |post| post.insert_comment(comment))
                .unwrap_or(false),
            ChangeDescriptor::CommentDeleted { id, post_id } => self
                .with_post(post_id, |post| post.remove_comment(id))
                .unwrap_or(false),
            ChangeDescriptor::LikeInserted(like) => self
                .with_post(like.post_id, |post| post.insert_like(like))
                .unwrap_or(false),
            ChangeDescriptor::LikeDeleted { post_id, user_id } => self
                .with_post(post_id, |post| post.remove_like(user_id))
                .unwrap_or(false),
            ChangeDescriptor::NotificationInserted(_)
            | ChangeDescriptor::NotificationRead { .. } => {
                debug!("Notification change routed to the feed store; ignoring");
                false
            }
        };

        if changed {
            self.publish();
        }
        changed
    }

    /// Realtime inserts are always newer than any fetched page, so a new
    /// post is prepended rather than re-sorted. An insert for an id already
    /// held (fetch racing the realtime push) merges instead, keeping
    /// whatever children the held aggregate accumulated.
    fn insert_post(&mut self, post: Post) -> bool {
        match self.posts.iter_mut().find(|held| held.id == post.id) {
            Some(held) => held.merge_authoritative(post),
            None => self.posts.insert(0, post),
        }
        true
    }

    fn with_post<T>(
        &mut self,
        id: Id<PostMarker>,
        apply: impl FnOnce(&mut Post) -> T,
    ) -> Option<T> {
        match self.posts.iter_mut().find(|post| post.id == id) {
            Some(post) => Some(apply(post)),
            None => {
                debug!(post = %id, "Change for a post that is not loaded; ignoring");
                None
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::from(self.posts.clone()));
    }
}

impl Default for FeedStore {
    fn default() -> Self {
        Self::new()
    }
}
