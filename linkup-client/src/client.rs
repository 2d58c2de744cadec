use crate::backend::FeedBackend;
use crate::realtime::{self, Subscription};
use crate::record::{
    CommentRecord, LikeRecord, NotificationRecord, PostRecord, RecordError, RowKeyRecord,
    UserRecord,
};
use async_trait::async_trait;
use linkup_common::change::EntityKind;
use linkup_common::model::Id;
use linkup_common::model::notification::{Notification, NotificationDraft};
use linkup_common::model::post::{
    Comment, CommentDraft, CommentMarker, Like, Post, PostDraft, PostMarker,
};
use linkup_common::model::user::{MediaPath, User, UserMarker};
use linkup_common::util::PageLimit;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Embeds requested with every post fetch so aggregates arrive hydrated.
const POST_SELECT: &str =
    "*,user:users(id,name,image),postLikes(userId),comments(*,user:users(id,name,image))";
const COMMENT_SELECT: &str = "*,user:users(id,name,image)";
const USER_SELECT: &str = "id,name,image";
const NOTIFICATION_SELECT: &str = "*,sender:senderId(id,name,image)";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport failure: {0}")]
    Http(#[from] reqwest::Error),
    #[error("The platform replied with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("An endpoint URL could not be built: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("Credential material cannot be sent as a header: {0}")]
    Credentials(#[from] InvalidHeaderValue),
    #[error("A returned row could not be converted: {0}")]
    Record(#[from] RecordError),
    #[error("The platform returned no representation for a write")]
    EmptyWrite,
    #[error("The realtime connection failed: {0}")]
    Realtime(String),
    #[error("The configured session user {0} does not exist")]
    UnknownSessionUser(Id<UserMarker>),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Project base URL, e.g. `https://abcdefgh.example.co/`.
    pub base_url: Url,
    pub api_key: String,
    pub access_token: String,
    /// Identity of the signed-in user. Token acquisition and refresh are
    /// the embedding application's job.
    pub user_id: Id<UserMarker>,
}

/// Client for the hosted platform's relational REST interface and realtime
/// stream.
pub struct RestClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RestClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();

        let mut api_key = HeaderValue::from_str(&config.api_key)?;
        api_key.set_sensitive(true);
        headers.insert("apikey", api_key);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.access_token))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self { http, config })
    }

    /// Maps an opaque stored path onto the public storage URL. Pure; no
    /// network call.
    pub fn resolve_media_url(&self, path: &MediaPath) -> Result<Url> {
        let url = self
            .config
            .base_url
            .join("storage/v1/object/public/uploads/")?
            .join(path.get())?;
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.config.base_url.join(path)?)
    }

    fn realtime_url(&self) -> Result<Url> {
        let mut url = self.endpoint("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::Realtime("base URL scheme is not upgradable".to_owned()))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.config.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut detail = response.text().await.unwrap_or_default();
        detail.truncate(200);
        Err(ClientError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn fetch_rows<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .query(query)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Inserts (or upserts, per `prefer`) and returns the representation row.
    async fn write_row<T, B>(&self, path: &str, select: &str, prefer: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .query(&[("select", select)])
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let rows: Vec<T> = response.json().await?;
        rows.into_iter().next().ok_or(ClientError::EmptyWrite)
    }

    async fn delete_rows(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint(path)?)
            .query(query)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct PostDraftRow<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(rename = "userId")]
    user_id: u64,
    body: &'a str,
    file: Option<&'a str>,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct CommentDraftRow<'a> {
    #[serde(rename = "postId")]
    post_id: u64,
    #[serde(rename = "userId")]
    user_id: u64,
    text: &'a str,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
struct LikeDraftRow {
    #[serde(rename = "postId")]
    post_id: u64,
    #[serde(rename = "userId")]
    user_id: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct NotificationDraftRow<'a> {
    #[serde(rename = "senderId")]
    sender_id: u64,
    #[serde(rename = "receiverId")]
    receiver_id: u64,
    title: &'a str,
    data: String,
}

#[async_trait]
impl FeedBackend for RestClient {
    async fn current_user(&self) -> Result<User> {
        let user_id = self.config.user_id;
        self.fetch_user(user_id)
            .await?
            .ok_or(ClientError::UnknownSessionUser(user_id))
    }

    async fn fetch_posts_page(
        &self,
        limit: PageLimit,
        author: Option<Id<UserMarker>>,
    ) -> Result<Vec<Post>> {
        let mut query = vec![
            ("select", POST_SELECT.to_owned()),
            ("order", "created_at.desc".to_owned()),
            ("limit", limit.get().to_string()),
        ];
        if let Some(author) = author {
            query.push(("userId", format!("eq.{author}")));
        }

        let rows: Vec<PostRecord> = self.fetch_rows("rest/v1/posts", &query).await?;
        let posts = rows
            .into_iter()
            .map(PostRecord::into_post)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        let query = [
            ("select", POST_SELECT.to_owned()),
            ("id", format!("eq.{id}")),
            ("limit", "1".to_owned()),
        ];

        let rows: Vec<PostRecord> = self.fetch_rows("rest/v1/posts", &query).await?;
        let post = rows
            .into_iter()
            .next()
            .map(PostRecord::into_post)
            .transpose()?;
        Ok(post)
    }

    async fn fetch_user(&self, id: Id<UserMarker>) -> Result<Option<User>> {
        let query = [
            ("select", USER_SELECT.to_owned()),
            ("id", format!("eq.{id}")),
            ("limit", "1".to_owned()),
        ];

        let rows: Vec<UserRecord> = self.fetch_rows("rest/v1/users", &query).await?;
        let user = rows.into_iter().next().map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn upsert_post(&self, draft: &PostDraft) -> Result<Post> {
        let row = PostDraftRow {
            id: draft.id.map(Id::get),
            user_id: draft.author.get(),
            body: &draft.body,
            file: draft.file.as_ref().map(MediaPath::get),
        };

        let record: PostRecord = self
            .write_row(
                "rest/v1/posts",
                POST_SELECT,
                "return=representation,resolution=merge-duplicates",
                &row,
            )
            .await?;
        Ok(record.into_post()?)
    }

    async fn delete_post(&self, id: Id<PostMarker>) -> Result<()> {
        self.delete_rows("rest/v1/posts", &[("id", format!("eq.{id}"))])
            .await
    }

    async fn create_comment(&self, draft: &CommentDraft) -> Result<Comment> {
        let row = CommentDraftRow {
            post_id: draft.post_id.get(),
            user_id: draft.author.get(),
            text: &draft.text,
        };

        let record: CommentRecord = self
            .write_row(
                "rest/v1/comments",
                COMMENT_SELECT,
                "return=representation",
                &row,
            )
            .await?;
        Ok(record.into_comment()?)
    }

    async fn delete_comment(&self, id: Id<CommentMarker>) -> Result<()> {
        self.delete_rows("rest/v1/comments", &[("id", format!("eq.{id}"))])
            .await
    }

    async fn create_like(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<Like> {
        let row = LikeDraftRow {
            post_id: post.get(),
            user_id: user.get(),
        };

        let record: LikeRecord = self
            .write_row(
                "rest/v1/postLikes",
                "postId,userId",
                "return=representation",
                &row,
            )
            .await?;
        Ok(record.into_like(post))
    }

    async fn delete_like(&self, post: Id<PostMarker>, user: Id<UserMarker>) -> Result<()> {
        self.delete_rows(
            "rest/v1/postLikes",
            &[
                ("postId", format!("eq.{post}")),
                ("userId", format!("eq.{user}")),
            ],
        )
        .await
    }

    async fn fetch_notifications(&self, receiver: Id<UserMarker>) -> Result<Vec<Notification>> {
        let query = [
            ("select", NOTIFICATION_SELECT.to_owned()),
            ("receiverId", format!("eq.{receiver}")),
            ("order", "created_at.desc".to_owned()),
        ];

        let rows: Vec<NotificationRecord> =
            self.fetch_rows("rest/v1/notifications", &query).await?;
        let notifications = rows
            .into_iter()
            .map(NotificationRecord::into_notification)
            .collect::<Result<_, _>>()?;
        Ok(notifications)
    }

    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification> {
        let row = NotificationDraftRow {
            sender_id: draft.sender.get(),
            receiver_id: draft.receiver.get(),
            title: &draft.title,
            data: draft.payload.to_string(),
        };

        let record: NotificationRecord = self
            .write_row(
                "rest/v1/notifications",
                NOTIFICATION_SELECT,
                "return=representation",
                &row,
            )
            .await?;
        Ok(record.into_notification()?)
    }

    async fn mark_notifications_read(&self, receiver: Id<UserMarker>) -> Result<()> {
        let response = self
            .http
            .patch(self.endpoint("rest/v1/notifications")?)
            .query(&[
                ("receiverId", format!("eq.{receiver}")),
                ("read", "eq.false".to_owned()),
            ])
            .json(&serde_json::json!({ "read": true }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn count_unread_notifications(&self, receiver: Id<UserMarker>) -> Result<u64> {
        let query = [
            ("select", "id".to_owned()),
            ("receiverId", format!("eq.{receiver}")),
            ("read", "eq.false".to_owned()),
        ];

        let rows: Vec<RowKeyRecord> = self.fetch_rows("rest/v1/notifications", &query).await?;
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }

    async fn subscribe(&self, kind: EntityKind) -> Result<Subscription> {
        realtime::connect(self.realtime_url()?, kind).await
    }
}
