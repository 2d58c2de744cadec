//! Uniform descriptions of row-level change events.
//!
//! The realtime stream delivers loosely-typed [`RawChange`] notifications;
//! the feed normalizer turns them into typed [`ChangeDescriptor`]s that the
//! store knows how to apply.

use crate::model::Id;
use crate::model::notification::{Notification, NotificationMarker};
use crate::model::post::{Comment, CommentMarker, Like, Post, PostMarker};
use crate::model::user::{MediaPath, UserMarker};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Post,
    Comment,
    Like,
    Notification,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Post,
        EntityKind::Comment,
        EntityKind::Like,
        EntityKind::Notification,
    ];

    /// Name of the backing table in the hosted platform.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Post => "posts",
            EntityKind::Comment => "comments",
            EntityKind::Like => "postLikes",
            EntityKind::Notification => "notifications",
        }
    }

    #[must_use]
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One change notification as delivered by the transport.
///
/// `new` is present for insert/update, `old` for update/delete; for deletes
/// the platform replicates at minimum the identity columns into `old`.
/// Neither is trusted: rows may be missing fields or malformed, and the
/// normalizer drops such events rather than failing the stream.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct RawChange {
    pub kind: EntityKind,
    pub op: ChangeOp,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

/// Normalized, fully-hydrated change ready for application to the feed.
#[derive(Clone, PartialEq, Debug)]
pub enum ChangeDescriptor {
    PostInserted(Post),
    PostUpdated {
        id: Id<PostMarker>,
        body: String,
        file: Option<MediaPath>,
    },
    PostDeleted {
        id: Id<PostMarker>,
    },
    CommentInserted(Comment),
    CommentDeleted {
        id: Id<CommentMarker>,
        post_id: Id<PostMarker>,
    },
    LikeInserted(Like),
    LikeDeleted {
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    },
    NotificationInserted(Notification),
    NotificationRead {
        id: Id<NotificationMarker>,
    },
}

impl ChangeDescriptor {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            ChangeDescriptor::PostInserted(_)
            | ChangeDescriptor::PostUpdated { .. }
            | ChangeDescriptor::PostDeleted { .. } => EntityKind::Post,
            ChangeDescriptor::CommentInserted(_) | ChangeDescriptor::CommentDeleted { .. } => {
                EntityKind::Comment
            }
            ChangeDescriptor::LikeInserted(_) | ChangeDescriptor::LikeDeleted { .. } => {
                EntityKind::Like
            }
            ChangeDescriptor::NotificationInserted(_)
            | ChangeDescriptor::NotificationRead { .. } => EntityKind::Notification,
        }
    }

    #[must_use]
    pub fn op(&self) -> ChangeOp {
        match self {
            ChangeDescriptor::PostInserted(_)
            | ChangeDescriptor::CommentInserted(_)
            | ChangeDescriptor::LikeInserted(_)
            | ChangeDescriptor::NotificationInserted(_) => ChangeOp::Insert,
            ChangeDescriptor::PostUpdated { .. } | ChangeDescriptor::NotificationRead { .. } => {
                ChangeOp::Update
            }
            ChangeDescriptor::PostDeleted { .. }
            | ChangeDescriptor::CommentDeleted { .. }
            | ChangeDescriptor::LikeDeleted { .. } => ChangeOp::Delete,
        }
    }

    /// The parent post this change targets, for embedded entity kinds.
    #[must_use]
    pub fn parent_post_id(&self) -> Option<Id<PostMarker>> {
        match self {
            ChangeDescriptor::CommentInserted(comment) => Some(comment.post_id),
            ChangeDescriptor::CommentDeleted { post_id, .. }
            | ChangeDescriptor::LikeDeleted { post_id, .. } => Some(*post_id),
            ChangeDescriptor::LikeInserted(like) => Some(like.post_id),
            _ => None,
        }
    }
}
