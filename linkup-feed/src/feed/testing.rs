//! In-memory backend double and model fixtures shared by the feed tests.

use async_trait::async_trait;
use linkup_client::backend::FeedBackend;
use linkup_client::client::{ClientError, Result};
use linkup_client::realtime::Subscription;
use linkup_common::change::{EntityKind, RawChange};
use linkup_common::model::Id;
use linkup_common::model::notification::{Notification, NotificationDraft, NotificationMarker};
use linkup_common::model::post::{
    Comment, CommentDraft, CommentMarker, Like, Post, PostDraft, PostMarker,
};
use linkup_common::model::user::{User, UserMarker, UserName};
use linkup_common::util::PageLimit;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use time::macros::utc_datetime;
use time::{Duration, UtcDateTime};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedSender;

pub(crate) fn user(id: u64, name: &str) -> User {
    User {
        id: id.into(),
        name: UserName::new(name.to_owned()).unwrap(),
        avatar: None,
    }
}

pub(crate) fn post(id: u64) -> Post {
    post_at(id, utc_datetime!(2025-06-01 12:00))
}

pub(crate) fn post_at(id: u64, created_at: UtcDateTime) -> Post {
    Post {
        id: id.into(),
        author: user(100 + id, "Ada"),
        body: format!("<p>post {id}</p>"),
        file: None,
        created_at,
        comments: Vec::new(),
        likes: Vec::new(),
    }
}

pub(crate) fn comment(id: u64, post_id: u64, author_id: u64) -> Comment {
    Comment {
        id: id.into(),
        post_id: post_id.into(),
        author: user(author_id, "Grace"),
        text: "nice".to_owned(),
        created_at: utc_datetime!(2025-06-01 13:00),
    }
}

pub(crate) fn like(post_id: u64, user_id: u64) -> Like {
    Like {
        post_id: post_id.into(),
        user_id: user_id.into(),
    }
}

pub(crate) fn notification(id: u64, read: bool) -> Notification {
    Notification {
        id: id.into(),
        sender: user(7, "Ada"),
        receiver: 1.into(),
        title: "commented on your post".to_owned(),
        payload: serde_json::Value::Null,
        read,
        created_at: utc_datetime!(2025-06-01 12:00)
            + Duration::seconds(i64::try_from(id).unwrap()),
    }
}

/// Scriptable [`FeedBackend`]: page responses are queued up front, realtime
/// events are pushed through the senders captured at subscribe time, and
/// every interesting interaction is recorded for assertions.
pub(crate) struct StubBackend {
    viewer: User,
    users: Mutex<HashMap<u64, User>>,
    pub pages: Mutex<VecDeque<Vec<Post>>>,
    /// Closed (zero permits) to hold a page fetch mid-flight; release with
    /// [`Semaphore::add_permits`].
    pub page_gate: Semaphore,
    pub fail_pages: AtomicBool,
    pub unread: AtomicU64,
    pub notification_list: Mutex<Vec<Notification>>,
    pub user_fetches: AtomicUsize,
    pub page_fetches: AtomicUsize,
    pub notifications_created: Mutex<Vec<NotificationDraft>>,
    pub marked_read: AtomicBool,
    pub senders: Mutex<HashMap<EntityKind, UnboundedSender<RawChange>>>,
    pub subscribed: Mutex<Vec<EntityKind>>,
    next_id: AtomicU64,
}

impl StubBackend {
    pub fn new(viewer: User) -> Self {
        Self {
            viewer,
            users: Mutex::new(HashMap::new()),
            pages: Mutex::new(VecDeque::new()),
            page_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            fail_pages: AtomicBool::new(false),
            unread: AtomicU64::new(0),
            notification_list: Mutex::new(Vec::new()),
            user_fetches: AtomicUsize::new(0),
            page_fetches: AtomicUsize::new(0),
            notifications_created: Mutex::new(Vec::new()),
            marked_read: AtomicBool::new(false),
            senders: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    pub fn add_user(&self, user: User) {
        lock(&self.users).insert(user.id.get(), user);
    }

    pub fn queue_page(&self, page: Vec<Post>) {
        lock(&self.pages).push_back(page);
    }

    pub fn push_change(&self, change: RawChange) {
        let senders = lock(&self.senders);
        senders
            .get(&change.kind)
            .expect("no subscription for this kind")
            .send(change)
            .expect("subscription consumer gone");
    }

    fn resolve_user(&self, id: Id<UserMarker>) -> User {
        if id == self.viewer.id {
            return self.viewer.clone();
        }
        lock(&self.users).get(&id.get()).cloned().unwrap_or_else(|| {
            User {
                id,
                name: UserName::new("Unknown".to_owned()).unwrap(),
                avatar: None,
            }
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl FeedBackend for StubBackend {
    async fn current_user(&self) -> Result<User> {
        Ok(self.viewer.clone())
    }

    async fn fetch_posts_page(
        &self,
        limit: PageLimit,
        _author: Option<Id<UserMarker>>,
    ) -> Result<Vec<Post>> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .page_gate
            .acquire()
            .await
            .map_err(|err| ClientError::Realtime(err.to_string()))?;
        drop(permit);

        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(ClientError::Realtime("scripted page failure".to_owned()));
        }

        let mut page = lock(&self.pages).pop_front().unwrap_or_default();
        page.truncate(usize::try_from(limit.get()).unwrap());
        Ok(page)
    }

    async fn fetch_post(&self, _id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(None)
    }

    async fn fetch_user(&self, id: Id<UserMarker>) -> Result<Option<User>> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        if id == self.viewer.id {
            return Ok(Some(self.viewer.clone()));
        }
        Ok(lock(&self.users).get(&id.get()).cloned())
    }

    async fn upsert_post(&self, draft: &PostDraft) -> Result<Post> {
        Ok(Post {
            id: draft.id.unwrap_or_else(|| self.next_id().into()),
            author: self.resolve_user(draft.author),
            body: draft.body.clone(),
            file: draft.file.clone(),
            created_at: UtcDateTime::now(),
            comments: Vec::new(),
            likes: Vec::new(),
        })
    }

    async fn delete_post(&self, _id: Id<PostMarker>) -> Result<()> {
        Ok(())
    }

    async fn create_comment(&self, draft: &CommentDraft) -> Result<Comment> {
        Ok(Comment {
            id: self.next_id().into(),
            post_id: draft.post_id,
            author: self.resolve_user(draft.author),
            text: draft.text.clone(),
            created_at: UtcDateTime::now(),
        })
    }

    async fn delete_comment(&self, _id: Id<CommentMarker>) -> Result<()> {
        Ok(())
    }

    async fn create_like(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<Like> {
        Ok(Like {
            post_id: post,
            user_id: user,
        })
    }

    async fn delete_like(&self, _post: Id<PostMarker>, _user: Id<UserMarker>) -> Result<()> {
        Ok(())
    }

    async fn fetch_notifications(&self, _receiver: Id<UserMarker>) -> Result<Vec<Notification>> {
        Ok(lock(&self.notification_list).clone())
    }

    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification> {
        lock(&self.notifications_created).push(draft.clone());
        let id: Id<NotificationMarker> = self.next_id().into();
        Ok(Notification {
            id,
            sender: self.resolve_user(draft.sender),
            receiver: draft.receiver,
            title: draft.title.clone(),
            payload: draft.payload.clone(),
            read: false,
            created_at: UtcDateTime::now(),
        })
    }

    async fn mark_notifications_read(&self, _receiver: Id<UserMarker>) -> Result<()> {
        self.marked_read.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn count_unread_notifications(&self, _receiver: Id<UserMarker>) -> Result<u64> {
        Ok(self.unread.load(Ordering::SeqCst))
    }

    async fn subscribe(&self, kind: EntityKind) -> Result<Subscription> {
        let (tx, subscription) = Subscription::channel();
        lock(&self.senders).insert(kind, tx);
        lock(&self.subscribed).push(kind);
        Ok(subscription)
    }
}
