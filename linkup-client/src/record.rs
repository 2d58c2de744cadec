//! Wire-level rows as the platform's relational REST interface and realtime
//! stream deliver them, plus conversions into the domain model.
//!
//! Conversions fail when a row violates a model invariant (invalid name or
//! media path) or lacks an embed the caller required (an author that was
//! supposed to be joined in). Callers decide whether that is a hard error
//! (bulk fetch) or a dropped event (realtime).

use linkup_common::model::ModelValidationError;
use linkup_common::model::notification::Notification;
use linkup_common::model::post::{Comment, Like, Post, PostMarker};
use linkup_common::model::user::{MediaPath, User, UserName};
use linkup_common::model::Id;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum RecordError {
    #[error("A row violated a model invariant: {0}")]
    Invalid(#[from] ModelValidationError),
    #[error("A {0} row was missing its embedded author")]
    MissingAuthor(&'static str),
}

#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub name: String,
    pub image: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct PostRecord {
    pub id: u64,
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub body: String,
    pub file: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default, rename = "postLikes")]
    pub post_likes: Vec<LikeRecord>,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct CommentRecord {
    pub id: u64,
    #[serde(rename = "postId")]
    pub post_id: u64,
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// Embedded like rows carry only the liking user; realtime rows carry the
/// full record including `postId`.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct LikeRecord {
    #[serde(default, rename = "postId")]
    pub post_id: Option<u64>,
    #[serde(rename = "userId")]
    pub user_id: u64,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    #[serde(rename = "senderId")]
    pub sender_id: u64,
    #[serde(rename = "receiverId")]
    pub receiver_id: u64,
    pub title: String,
    /// JSON-encoded string on the wire; see [`NotificationRecord::payload`].
    pub data: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub sender: Option<UserRecord>,
}

/// Minimal identity shapes for delete events, where the platform replicates
/// only the key columns into the old row.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct RowKeyRecord {
    pub id: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct CommentKeyRecord {
    pub id: u64,
    #[serde(rename = "postId")]
    pub post_id: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
pub struct LikeKeyRecord {
    #[serde(rename = "postId")]
    pub post_id: u64,
    #[serde(rename = "userId")]
    pub user_id: u64,
}

impl TryFrom<UserRecord> for User {
    type Error = RecordError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let avatar = value
            .image
            .map(MediaPath::new)
            .transpose()
            .map_err(ModelValidationError::from)?;

        Ok(User {
            id: value.id.into(),
            name: UserName::new(value.name).map_err(ModelValidationError::from)?,
            avatar,
        })
    }
}

impl PostRecord {
    /// Converts a fully-embedded row (bulk fetch) into the aggregate.
    pub fn into_post(mut self) -> Result<Post, RecordError> {
        let author = self
            .user
            .take()
            .ok_or(RecordError::MissingAuthor("post"))?
            .try_into()?;
        self.into_post_with_author(author)
    }

    /// Converts a bare row (realtime) using an author resolved elsewhere.
    pub fn into_post_with_author(self, author: User) -> Result<Post, RecordError> {
        let post_id: Id<PostMarker> = self.id.into();

        let likes = self
            .post_likes
            .into_iter()
            .map(|like| like.into_like(post_id))
            .collect();
        let comments = self
            .comments
            .into_iter()
            .map(CommentRecord::into_comment)
            .collect::<Result<_, _>>()?;
        let file = self
            .file
            .map(MediaPath::new)
            .transpose()
            .map_err(ModelValidationError::from)?;

        Ok(Post {
            id: post_id,
            author,
            body: self.body,
            file,
            created_at: self.created_at.to_utc(),
            comments,
            likes,
        })
    }
}

impl CommentRecord {
    pub fn into_comment(mut self) -> Result<Comment, RecordError> {
        let author = self
            .user
            .take()
            .ok_or(RecordError::MissingAuthor("comment"))?
            .try_into()?;
        Ok(self.into_comment_with_author(author))
    }

    #[must_use]
    pub fn into_comment_with_author(self, author: User) -> Comment {
        Comment {
            id: self.id.into(),
            post_id: self.post_id.into(),
            author,
            text: self.text,
            created_at: self.created_at.to_utc(),
        }
    }
}

impl LikeRecord {
    #[must_use]
    pub fn into_like(self, parent: Id<PostMarker>) -> Like {
        Like {
            post_id: self.post_id.map_or(parent, Into::into),
            user_id: self.user_id.into(),
        }
    }
}

impl NotificationRecord {
    /// The referenced post/comment, stored as a JSON-encoded string by the
    /// writer. An undecodable payload is carried through verbatim rather
    /// than dropped; it is opaque to the feed anyway.
    #[must_use]
    pub fn payload(&self) -> Value {
        match &self.data {
            None => Value::Null,
            Some(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
        }
    }

    pub fn into_notification(mut self) -> Result<Notification, RecordError> {
        let sender = self
            .sender
            .take()
            .ok_or(RecordError::MissingAuthor("notification"))?
            .try_into()?;
        Ok(self.into_notification_with_sender(sender))
    }

    #[must_use]
    pub fn into_notification_with_sender(self, sender: User) -> Notification {
        let payload = self.payload();

        Notification {
            id: self.id.into(),
            sender,
            receiver: self.receiver_id.into(),
            title: self.title,
            payload,
            read: self.read,
            created_at: self.created_at.to_utc(),
        }
    }
}
