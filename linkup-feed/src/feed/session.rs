//! Session lifecycle: owns the store, cursor, and inbox, consumes the
//! realtime change streams, and exposes the operations the app performs.

use crate::feed::cursor::PageCursor;
use crate::feed::normalize::Normalizer;
use crate::feed::notifications::NotificationInbox;
use crate::feed::store::FeedStore;
use crate::feed::{FeedConfig, Result};
use linkup_client::backend::FeedBackend;
use linkup_client::realtime::SubscriptionHandle;
use linkup_common::change::{ChangeDescriptor, EntityKind, RawChange};
use linkup_common::model::Id;
use linkup_common::model::notification::{Notification, NotificationDraft};
use linkup_common::model::post::{Comment, CommentDraft, CommentMarker, Post, PostDraft, PostMarker};
use linkup_common::model::user::{MediaPath, User, UserMarker};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a [`FeedSession::load_more`] call.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PageOutcome {
    /// A page was fetched and merged.
    Fetched(usize),
    /// The response held nothing new; the feed is exhausted.
    Exhausted,
    /// Nothing was requested: a fetch is already in flight or the feed is
    /// exhausted.
    Skipped,
}

struct FeedState {
    store: FeedStore,
    cursor: PageCursor,
    inbox: NotificationInbox,
}

/// A live personalized feed for one signed-in user.
///
/// Opening a session resolves the session user, seeds the unread badge,
/// subscribes to all four change streams, and spawns the single consumer
/// task that keeps the store and inbox current. All methods take `&self`;
/// the session is shared behind `Arc` between the consumer and callers.
pub struct FeedSession<B> {
    backend: Arc<B>,
    viewer: User,
    author_filter: Option<Id<UserMarker>>,
    state: Arc<Mutex<FeedState>>,
    handles: Vec<SubscriptionHandle>,
    shutdown: CancellationToken,
}

impl<B: FeedBackend> FeedSession<B> {
    pub async fn open(backend: Arc<B>, config: FeedConfig) -> Result<Self> {
        let viewer = backend.current_user().await?;
        let unread = backend.count_unread_notifications(viewer.id).await?;
        info!(user = %viewer.id, unread, "Feed session opened");

        let mut inbox = NotificationInbox::new();
        inbox.seed_unread(unread);
        let state = Arc::new(Mutex::new(FeedState {
            store: FeedStore::new(),
            cursor: PageCursor::new(config.page_size),
            inbox,
        }));

        let (posts, posts_handle) = backend.subscribe(EntityKind::Post).await?.split();
        let (comments, comments_handle) = backend.subscribe(EntityKind::Comment).await?.split();
        let (likes, likes_handle) = backend.subscribe(EntityKind::Like).await?.split();
        let (notifications, notifications_handle) =
            backend.subscribe(EntityKind::Notification).await?.split();

        let shutdown = CancellationToken::new();
        tokio::spawn(consume_changes(
            Normalizer::new(Arc::clone(&backend), viewer.clone()),
            Arc::clone(&state),
            Streams {
                posts,
                comments,
                likes,
                notifications,
            },
            shutdown.clone(),
        ));

        Ok(Self {
            backend,
            viewer,
            author_filter: config.author,
            state,
            handles: vec![
                posts_handle,
                comments_handle,
                likes_handle,
                notifications_handle,
            ],
            shutdown,
        })
    }

    #[must_use]
    pub fn viewer(&self) -> &User {
        &self.viewer
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<[Post]> {
        self.lock().store.snapshot()
    }

    /// Receiver yielding the feed snapshot after every applied change.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<Arc<[Post]>> {
        self.lock().store.watch()
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.lock().cursor.has_more()
    }

    #[must_use]
    pub fn unread_notifications(&self) -> u64 {
        self.lock().inbox.unread()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().inbox.snapshot().to_vec()
    }

    /// Requests the next page. A call while a fetch is in flight, or after
    /// the feed is exhausted, does nothing. A failed fetch leaves the
    /// cursor retryable and the store untouched.
    pub async fn load_more(&self) -> Result<PageOutcome> {
        let (limit, held) = {
            let mut state = self.lock();
            match state.cursor.begin() {
                Some(limit) => (limit, state.store.len()),
                None => return Ok(PageOutcome::Skipped),
            }
        };

        match self.backend.fetch_posts_page(limit, self.author_filter).await {
            Ok(page) => {
                let fetched = page.len();
                let mut state = self.lock();
                state.cursor.complete(fetched, held);
                if fetched == held {
                    debug!(held, "Feed exhausted");
                    Ok(PageOutcome::Exhausted)
                } else {
                    state.store.apply_bulk(page);
                    Ok(PageOutcome::Fetched(fetched))
                }
            }
            Err(err) => {
                self.lock().cursor.abort();
                Err(err.into())
            }
        }
    }

    pub async fn publish_post(&self, body: String, file: Option<MediaPath>) -> Result<Post> {
        let draft = PostDraft {
            id: None,
            author: self.viewer.id,
            body,
            file,
        };
        let post = self.backend.upsert_post(&draft).await?;
        self.apply_local(ChangeDescriptor::PostInserted(post.clone()));
        Ok(post)
    }

    pub async fn edit_post(
        &self,
        id: Id<PostMarker>,
        body: String,
        file: Option<MediaPath>,
    ) -> Result<Post> {
        let draft = PostDraft {
            id: Some(id),
            author: self.viewer.id,
            body,
            file,
        };
        let post = self.backend.upsert_post(&draft).await?;
        self.apply_local(ChangeDescriptor::PostUpdated {
            id: post.id,
            body: post.body.clone(),
            file: post.file.clone(),
        });
        Ok(post)
    }

    pub async fn retract_post(&self, id: Id<PostMarker>) -> Result<()> {
        self.backend.delete_post(id).await?;
        self.apply_local(ChangeDescriptor::PostDeleted { id });
        Ok(())
    }

    /// Creates the comment remotely and applies it locally at once; the
    /// realtime echo deduplicates through store idempotence. Notifies the
    /// post author unless the session user is commenting on their own post.
    pub async fn publish_comment(&self, post_id: Id<PostMarker>, text: String) -> Result<Comment> {
        let draft = CommentDraft {
            post_id,
            author: self.viewer.id,
            text,
        };
        let comment = self.backend.create_comment(&draft).await?;
        self.apply_local(ChangeDescriptor::CommentInserted(comment.clone()));
        self.notify_post_author(
            post_id,
            "commented on your post",
            json!({ "postId": post_id.get(), "commentId": comment.id.get() }),
        )
        .await;
        Ok(comment)
    }

    pub async fn remove_comment(
        &self,
        id: Id<CommentMarker>,
        post_id: Id<PostMarker>,
    ) -> Result<()> {
        self.backend.delete_comment(id).await?;
        self.apply_local(ChangeDescriptor::CommentDeleted { id, post_id });
        Ok(())
    }

    /// Sets whether the session user likes the post. Liking notifies the
    /// post author; unliking never does.
    pub async fn set_liked(&self, post_id: Id<PostMarker>, liked: bool) -> Result<()> {
        if liked {
            let like = self.backend.create_like(post_id, self.viewer.id).await?;
            self.apply_local(ChangeDescriptor::LikeInserted(like));
            self.notify_post_author(
                post_id,
                "liked your post",
                json!({ "postId": post_id.get() }),
            )
            .await;
        } else {
            self.backend.delete_like(post_id, self.viewer.id).await?;
            self.apply_local(ChangeDescriptor::LikeDeleted {
                post_id,
                user_id: self.viewer.id,
            });
        }
        Ok(())
    }

    /// Authoritative notification list fetch; replaces the inbox.
    pub async fn refresh_notifications(&self) -> Result<Vec<Notification>> {
        let notifications = self.backend.fetch_notifications(self.viewer.id).await?;
        let mut state = self.lock();
        state.inbox.replace_all(notifications);
        Ok(state.inbox.snapshot().to_vec())
    }

    pub async fn mark_notifications_read(&self) -> Result<()> {
        self.backend.mark_notifications_read(self.viewer.id).await?;
        self.lock().inbox.mark_all_read();
        Ok(())
    }

    /// Ends the consumer task and releases every subscription. Idempotent;
    /// dropping the session has the same effect.
    pub fn close(&self) {
        self.shutdown.cancel();
        for handle in &self.handles {
            handle.release();
        }
    }

    fn apply_local(&self, descriptor: ChangeDescriptor) {
        apply(&self.state, descriptor);
    }

    /// The notification a comment or like produces for the post author.
    /// Failure here must not fail the write that caused it.
    async fn notify_post_author(&self, post_id: Id<PostMarker>, title: &str, payload: Value) {
        let receiver = self
            .snapshot()
            .iter()
            .find(|post| post.id == post_id)
            .map(|post| post.author.id);
        let Some(receiver) = receiver else {
            debug!(post = %post_id, "Post author unknown locally; skipping notification");
            return;
        };
        if receiver == self.viewer.id {
            return;
        }

        let draft = NotificationDraft {
            sender: self.viewer.id,
            receiver,
            title: title.to_owned(),
            payload,
        };
        if let Err(err) = self.backend.create_notification(&draft).await {
            warn!(error = %err, "Failed to record the notification");
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B> Drop for FeedSession<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Streams {
    posts: mpsc::UnboundedReceiver<RawChange>,
    comments: mpsc::UnboundedReceiver<RawChange>,
    likes: mpsc::UnboundedReceiver<RawChange>,
    notifications: mpsc::UnboundedReceiver<RawChange>,
}

async fn consume_changes<B: FeedBackend>(
    normalizer: Normalizer<B>,
    state: Arc<Mutex<FeedState>>,
    mut streams: Streams,
    shutdown: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            () = shutdown.cancelled() => break,
            Some(raw) = streams.posts.recv() => raw,
            Some(raw) = streams.comments.recv() => raw,
            Some(raw) = streams.likes.recv() => raw,
            Some(raw) = streams.notifications.recv() => raw,
            else => {
                debug!("All change streams ended");
                break;
            }
        };
        if let Some(descriptor) = normalizer.normalize(raw).await {
            apply(&state, descriptor);
        }
    }
}

/// The lock is never held across an await; normalization happens before
/// application.
fn apply(state: &Mutex<FeedState>, descriptor: ChangeDescriptor) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match descriptor {
        ChangeDescriptor::NotificationInserted(notification) => {
            state.inbox.apply_insert(notification);
        }
        ChangeDescriptor::NotificationRead { id } => {
            state.inbox.apply_read(id);
        }
        other => {
            state.store.apply_change(other);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::feed::FeedConfig;
    use crate::feed::session::{FeedSession, PageOutcome};
    use crate::feed::testing::{StubBackend, notification, post, post_at, user};
    use linkup_common::change::{ChangeOp, EntityKind, RawChange};
    use linkup_common::util::PageLimit;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use time::macros::utc_datetime;

    fn config() -> FeedConfig {
        FeedConfig {
            page_size: PageLimit::new_unchecked(2),
            author: None,
        }
    }

    async fn open(backend: &Arc<StubBackend>) -> FeedSession<StubBackend> {
        FeedSession::open(Arc::clone(backend), config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_subscribes_to_all_streams_and_seeds_the_badge() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.unread.store(3, Ordering::SeqCst);

        let session = open(&backend).await;

        assert_eq!(session.unread_notifications(), 3);
        let subscribed = backend.subscribed.lock().unwrap().clone();
        assert_eq!(
            subscribed,
            [
                EntityKind::Post,
                EntityKind::Comment,
                EntityKind::Like,
                EntityKind::Notification,
            ]
        );
    }

    #[tokio::test]
    async fn load_more_grows_until_exhausted() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.queue_page(vec![
            post_at(1, utc_datetime!(2025-06-01 15:00)),
            post_at(2, utc_datetime!(2025-06-01 14:00)),
        ]);
        // The grown request returns the same two posts: nothing new.
        backend.queue_page(vec![
            post_at(1, utc_datetime!(2025-06-01 15:00)),
            post_at(2, utc_datetime!(2025-06-01 14:00)),
        ]);

        let session = open(&backend).await;

        assert_eq!(session.load_more().await.unwrap(), PageOutcome::Fetched(2));
        assert_eq!(session.snapshot().len(), 2);
        assert!(session.has_more());

        assert_eq!(session.load_more().await.unwrap(), PageOutcome::Exhausted);
        assert!(!session.has_more());
        assert_eq!(session.load_more().await.unwrap(), PageOutcome::Skipped);
        assert_eq!(backend.page_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_load_more_issues_one_fetch() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.queue_page(vec![post(1)]);
        // Hold the first fetch mid-flight.
        let permits = backend.page_gate.forget_permits(tokio::sync::Semaphore::MAX_PERMITS);
        assert!(permits > 0);

        let session = Arc::new(open(&backend).await);

        let racer = Arc::clone(&session);
        let first = tokio::spawn(async move { racer.load_more().await });
        // Wait until the first call has claimed the cursor and is parked in
        // the backend.
        while backend.page_fetches.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(session.load_more().await.unwrap(), PageOutcome::Skipped);

        backend.page_gate.add_permits(1);
        assert_eq!(
            first.await.unwrap().unwrap(),
            PageOutcome::Fetched(1)
        );
        assert_eq!(backend.page_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_cursor_retryable() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.fail_pages.store(true, Ordering::SeqCst);

        let session = open(&backend).await;
        assert!(session.load_more().await.is_err());
        assert!(session.has_more());
        assert!(session.snapshot().is_empty());

        backend.fail_pages.store(false, Ordering::SeqCst);
        backend.queue_page(vec![post(1)]);
        assert_eq!(session.load_more().await.unwrap(), PageOutcome::Fetched(1));
    }

    #[tokio::test]
    async fn realtime_changes_reach_the_store_and_inbox() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.add_user(user(7, "Ada"));
        let session = open(&backend).await;
        let mut updates = session.updates();

        backend.push_change(RawChange {
            kind: EntityKind::Post,
            op: ChangeOp::Insert,
            new: Some(json!({
                "id": 42,
                "userId": 7,
                "body": "<p>pushed</p>",
                "file": null,
                "created_at": "2025-06-01T12:00:00+00:00",
            })),
            old: None,
        });
        updates.changed().await.unwrap();
        assert_eq!(session.snapshot()[0].id, 42.into());

        backend.push_change(RawChange {
            kind: EntityKind::Notification,
            op: ChangeOp::Insert,
            new: Some(json!({
                "id": 5,
                "senderId": 7,
                "receiverId": 1,
                "title": "commented on your post",
                "data": "{\"postId\":42}",
                "read": false,
                "created_at": "2025-06-01T12:01:00+00:00",
            })),
            old: None,
        });
        while session.unread_notifications() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(session.notifications().len(), 1);
    }

    #[tokio::test]
    async fn commenting_on_a_foreign_post_notifies_its_author() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.queue_page(vec![post(9)]);
        let session = open(&backend).await;
        session.load_more().await.unwrap();

        let comment = session
            .publish_comment(9.into(), "first!".to_owned())
            .await
            .unwrap();
        assert_eq!(session.snapshot()[0].comments[0].id, comment.id);

        let drafts = backend.notifications_created.lock().unwrap().clone();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].receiver, post(9).author.id);
        assert_eq!(drafts[0].payload["postId"], 9);
    }

    #[tokio::test]
    async fn own_posts_never_produce_self_notifications() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        let session = open(&backend).await;

        let published = session
            .publish_post("<p>mine</p>".to_owned(), None)
            .await
            .unwrap();
        session.set_liked(published.id, true).await.unwrap();
        session
            .publish_comment(published.id, "note to self".to_owned())
            .await
            .unwrap();

        assert!(backend.notifications_created.lock().unwrap().is_empty());
        let snapshot = session.snapshot();
        assert!(snapshot[0].liked_by(1.into()));
        assert_eq!(snapshot[0].comments.len(), 1);

        session.set_liked(published.id, false).await.unwrap();
        assert!(!session.snapshot()[0].liked_by(1.into()));
    }

    #[tokio::test]
    async fn editing_and_retracting_update_the_local_feed() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        let session = open(&backend).await;
        assert_eq!(session.viewer().id, 1.into());

        let published = session
            .publish_post("<p>draft</p>".to_owned(), None)
            .await
            .unwrap();
        let edited = session
            .edit_post(published.id, "<p>final</p>".to_owned(), None)
            .await
            .unwrap();
        assert_eq!(edited.id, published.id);
        assert_eq!(session.snapshot()[0].body, "<p>final</p>");

        session.retract_post(published.id).await.unwrap();
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn removing_a_comment_applies_locally_at_once() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.queue_page(vec![post(9)]);
        let session = open(&backend).await;
        session.load_more().await.unwrap();

        let comment = session
            .publish_comment(9.into(), "typo".to_owned())
            .await
            .unwrap();
        assert_eq!(session.snapshot()[0].comments.len(), 1);

        session.remove_comment(comment.id, 9.into()).await.unwrap();
        assert!(session.snapshot()[0].comments.is_empty());
    }

    #[tokio::test]
    async fn refresh_replaces_the_inbox_with_the_fetched_list() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.unread.store(7, Ordering::SeqCst);
        *backend.notification_list.lock().unwrap() =
            vec![notification(1, true), notification(2, false)];
        let session = open(&backend).await;
        assert_eq!(session.unread_notifications(), 7);

        let listed = session.refresh_notifications().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(!listed[0].read);
        assert_eq!(session.unread_notifications(), 1);
    }

    #[tokio::test]
    async fn mark_all_read_clears_the_badge_remotely_and_locally() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        backend.unread.store(2, Ordering::SeqCst);
        let session = open(&backend).await;

        session.mark_notifications_read().await.unwrap();
        assert_eq!(session.unread_notifications(), 0);
        assert!(backend.marked_read.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let backend = Arc::new(StubBackend::new(user(1, "Viewer")));
        let session = open(&backend).await;

        session.close();
        session.close();
    }
}
