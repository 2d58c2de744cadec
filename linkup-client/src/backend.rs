//! The seam between the feed reconciler and the hosted platform.
//!
//! Everything "hard" (persistence, fan-out, consistency) lives behind this
//! trait: authoritative page fetches, single-record lookups, the mutations
//! the app performs, and the realtime change subscription. [`RestClient`]
//! implements it against the platform's REST interface; tests implement it
//! with an in-memory double.
//!
//! [`RestClient`]: crate::client::RestClient

use crate::client::Result;
use crate::realtime::Subscription;
use async_trait::async_trait;
use linkup_common::change::EntityKind;
use linkup_common::model::Id;
use linkup_common::model::notification::{Notification, NotificationDraft};
use linkup_common::model::post::{
    Comment, CommentDraft, CommentMarker, Like, Post, PostDraft, PostMarker,
};
use linkup_common::model::user::{User, UserMarker};
use linkup_common::util::PageLimit;

#[async_trait]
pub trait FeedBackend: Send + Sync + 'static {
    /// Identity of the session user. Required for any personalized feed
    /// operation; a session without one is an error, not an anonymous feed.
    async fn current_user(&self) -> Result<User>;

    /// Authoritative page fetch: the most recent `limit` posts, descending
    /// by creation time, each with hydrated author, comments, and likes.
    /// `author` narrows the feed to one user's posts (profile view).
    async fn fetch_posts_page(
        &self,
        limit: PageLimit,
        author: Option<Id<UserMarker>>,
    ) -> Result<Vec<Post>>;

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>>;

    /// Side lookup used to hydrate authors of foreign realtime inserts.
    async fn fetch_user(&self, id: Id<UserMarker>) -> Result<Option<User>>;

    /// Creates the post, or updates it when the draft carries an id.
    async fn upsert_post(&self, draft: &PostDraft) -> Result<Post>;

    async fn delete_post(&self, id: Id<PostMarker>) -> Result<()>;

    async fn create_comment(&self, draft: &CommentDraft) -> Result<Comment>;

    async fn delete_comment(&self, id: Id<CommentMarker>) -> Result<()>;

    async fn create_like(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<Like>;

    async fn delete_like(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<()>;

    async fn fetch_notifications(&self, receiver: Id<UserMarker>) -> Result<Vec<Notification>>;

    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification>;

    async fn mark_notifications_read(&self, receiver: Id<UserMarker>) -> Result<()>;

    async fn count_unread_notifications(&self, receiver: Id<UserMarker>) -> Result<u64>;

    /// Registers a realtime listener for one entity kind. The returned
    /// subscription owns a live connection; dropping or releasing its handle
    /// ends the stream.
    async fn subscribe(&self, kind: EntityKind) -> Result<Subscription>;
}
