use crate::model::Id;
use crate::model::user::{User, UserMarker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct NotificationMarker;

/// Server-created side effect of a comment or like relevant to a user other
/// than the actor. Top-level entity; never embedded in a post aggregate and
/// never deleted by the client.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Notification {
    pub id: Id<NotificationMarker>,
    pub sender: User,
    pub receiver: Id<UserMarker>,
    pub title: String,
    /// Opaque structured payload identifying the referenced post/comment.
    pub payload: Value,
    pub read: bool,
    pub created_at: UtcDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub sender: Id<UserMarker>,
    pub receiver: Id<UserMarker>,
    pub title: String,
    pub payload: Value,
}
