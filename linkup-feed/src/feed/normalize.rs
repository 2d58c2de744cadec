//! Turns raw change notifications into feed-ready descriptors.
//!
//! Realtime rows are bare: no embedded author, no children. Inserts that
//! need an author are hydrated with a side lookup, short-circuited when the
//! author is the session user. A change that cannot be made whole (missing
//! row, undecodable row, unresolvable author) is logged and dropped; a
//! partially-hydrated entity must never reach the store.

use linkup_client::backend::FeedBackend;
use linkup_client::record::{
    CommentKeyRecord, CommentRecord, LikeKeyRecord, NotificationRecord, PostRecord, RowKeyRecord,
};
use linkup_common::change::{ChangeDescriptor, ChangeOp, EntityKind, RawChange};
use linkup_common::model::Id;
use linkup_common::model::post::Like;
use linkup_common::model::user::{MediaPath, User, UserMarker};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Normalizer<B> {
    backend: Arc<B>,
    viewer: User,
}

impl<B: FeedBackend> Normalizer<B> {
    pub fn new(backend: Arc<B>, viewer: User) -> Self {
        Self { backend, viewer }
    }

    /// Normalizes one raw change, or `None` when it is irrelevant to the
    /// session (a notification for someone else) or cannot be completed.
    pub async fn normalize(&self, raw: RawChange) -> Option<ChangeDescriptor> {
        match (raw.kind, raw.op) {
            (EntityKind::Post, ChangeOp::Insert) => {
                let record: PostRecord = decode_row(raw.new, raw.kind, raw.op)?;
                let author = self.author(record.user_id.into()).await?;
                match record.into_post_with_author(author) {
                    Ok(post) => Some(ChangeDescriptor::PostInserted(post)),
                    Err(err) => {
                        warn!(error = %err, "Dropping invalid post insert");
                        None
                    }
                }
            }
            (EntityKind::Post, ChangeOp::Update) => {
                let record: PostRecord = decode_row(raw.new, raw.kind, raw.op)?;
                let file = match record.file.map(MediaPath::new).transpose() {
                    Ok(file) => file,
                    Err(err) => {
                        warn!(error = %err, "Dropping post update with invalid media path");
                        return None;
                    }
                };
                Some(ChangeDescriptor::PostUpdated {
                    id: record.id.into(),
                    body: record.body,
                    file,
                })
            }
            (EntityKind::Post, ChangeOp::Delete) => {
                let key: RowKeyRecord = decode_row(raw.old, raw.kind, raw.op)?;
                Some(ChangeDescriptor::PostDeleted { id: key.id.into() })
            }
            (EntityKind::Comment, ChangeOp::Insert) => {
                let record: CommentRecord = decode_row(raw.new, raw.kind, raw.op)?;
                let author = self.author(record.user_id.into()).await?;
                Some(ChangeDescriptor::CommentInserted(
                    record.into_comment_with_author(author),
                ))
            }
            (EntityKind::Comment, ChangeOp::Delete) => {
                let key: CommentKeyRecord = decode_row(raw.old, raw.kind, raw.op)?;
                Some(ChangeDescriptor::CommentDeleted {
                    id: key.id.into(),
                    post_id: key.post_id.into(),
                })
            }
            (EntityKind::Like, ChangeOp::Insert) => {
                let key: LikeKeyRecord = decode_row(raw.new, raw.kind, raw.op)?;
                Some(ChangeDescriptor::LikeInserted(Like {
                    post_id: key.post_id.into(),
                    user_id: key.user_id.into(),
                }))
            }
            (EntityKind::Like, ChangeOp::Delete) => {
                let key: LikeKeyRecord = decode_row(raw.old, raw.kind, raw.op)?;
                Some(ChangeDescriptor::LikeDeleted {
                    post_id: key.post_id.into(),
                    user_id: key.user_id.into(),
                })
            }
            (EntityKind::Notification, ChangeOp::Insert) => {
                let record: NotificationRecord = decode_row(raw.new, raw.kind, raw.op)?;
                if Id::from(record.receiver_id) != self.viewer.id {
                    debug!("Ignoring notification addressed to another user");
                    return None;
                }
                let sender = self.author(record.sender_id.into()).await?;
                Some(ChangeDescriptor::NotificationInserted(
                    record.into_notification_with_sender(sender),
                ))
            }
            (EntityKind::Notification, ChangeOp::Update) => {
                let record: NotificationRecord = decode_row(raw.new, raw.kind, raw.op)?;
                if Id::from(record.receiver_id) != self.viewer.id || !record.read {
                    return None;
                }
                Some(ChangeDescriptor::NotificationRead {
                    id: record.id.into(),
                })
            }
            (kind, op) => {
                debug!(?kind, ?op, "No feed effect for this change; ignoring");
                None
            }
        }
    }

    /// Resolves the author of a foreign insert. The session user never needs
    /// a lookup; anyone else costs one fetch, and an author that cannot be
    /// resolved drops the whole event.
    async fn author(&self, id: Id<UserMarker>) -> Option<User> {
        if id == self.viewer.id {
            return Some(self.viewer.clone());
        }
        match self.backend.fetch_user(id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                warn!(user = %id, "Dropping change authored by an unknown user");
                None
            }
            Err(err) => {
                warn!(user = %id, error = %err, "Author lookup failed; dropping change");
                None
            }
        }
    }
}

fn decode_row<T: DeserializeOwned>(
    row: Option<Value>,
    kind: EntityKind,
    op: ChangeOp,
) -> Option<T> {
    let Some(row) = row else {
        warn!(?kind, ?op, "Change notification without a row payload; dropping");
        return None;
    };
    match serde_json::from_value(row) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(?kind, ?op, error = %err, "Undecodable change row; dropping");
            None
        }
    }
}
