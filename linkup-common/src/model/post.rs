use crate::model::Id;
use crate::model::user::{MediaPath, User, UserMarker};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// One feed entry: a post together with its denormalized author, comments,
/// and likes.
///
/// Invariants: `comments` are unique per comment id, `likes` are unique per
/// liking user. All mutation goes through the helpers below, which keep
/// re-application of the same change a no-op.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub body: String,
    pub file: Option<MediaPath>,
    pub created_at: UtcDateTime,
    pub comments: Vec<Comment>,
    pub likes: Vec<Like>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: User,
    pub text: String,
    pub created_at: UtcDateTime,
}

/// Presence of a like is the whole record; identity is (post, user).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Like {
    pub post_id: Id<PostMarker>,
    pub user_id: Id<UserMarker>,
}

/// Input for creating a post, or updating one when `id` is present.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct PostDraft {
    pub id: Option<Id<PostMarker>>,
    pub author: Id<UserMarker>,
    pub body: String,
    pub file: Option<MediaPath>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct CommentDraft {
    pub post_id: Id<PostMarker>,
    pub author: Id<UserMarker>,
    pub text: String,
}

impl Post {
    #[must_use]
    pub fn liked_by(&self, user_id: Id<UserMarker>) -> bool {
        self.likes.iter().any(|like| like.user_id == user_id)
    }

    #[must_use]
    pub fn comment(&self, comment_id: Id<CommentMarker>) -> Option<&Comment> {
        self.comments.iter().find(|comment| comment.id == comment_id)
    }

    /// Appends the comment unless one with the same id is already present.
    /// Returns whether the aggregate changed.
    pub fn insert_comment(&mut self, comment: Comment) -> bool {
        if self.comments.iter().any(|held| held.id == comment.id) {
            return false;
        }
        self.comments.push(comment);
        true
    }

    pub fn remove_comment(&mut self, comment_id: Id<CommentMarker>) -> bool {
        let before = self.comments.len();
        self.comments.retain(|comment| comment.id != comment_id);
        self.comments.len() != before
    }

    /// Records the like unless the user already likes this post. Returns
    /// whether the aggregate changed.
    pub fn insert_like(&mut self, like: Like) -> bool {
        if self.liked_by(like.user_id) {
            return false;
        }
        self.likes.push(like);
        true
    }

    pub fn remove_like(&mut self, user_id: Id<UserMarker>) -> bool {
        let before = self.likes.len();
        self.likes.retain(|like| like.user_id != user_id);
        self.likes.len() != before
    }

    /// Merges an authoritative copy of the same post into this aggregate.
    ///
    /// Scalar fields are taken from `incoming`; comments and likes are
    /// unioned by identity so that children accumulated from the realtime
    /// stream are never discarded in favor of a stale bulk payload.
    pub fn merge_authoritative(&mut self, incoming: Post) {
        debug_assert_eq!(self.id, incoming.id);

        self.author = incoming.author;
        self.body = incoming.body;
        self.file = incoming.file;
        self.created_at = incoming.created_at;

        for comment in incoming.comments {
            self.insert_comment(comment);
        }
        for like in incoming.likes {
            self.insert_like(like);
        }
    }
}
