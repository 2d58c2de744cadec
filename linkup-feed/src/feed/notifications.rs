use linkup_common::model::Id;
use linkup_common::model::notification::{Notification, NotificationMarker};

/// The session user's notifications, newest first, plus the unread count
/// backing the badge.
///
/// The unread count is seeded from the backend at session start and tracked
/// incrementally from then on, so the badge works even while the list
/// itself has never been fetched.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct NotificationInbox {
    notifications: Vec<Notification>,
    unread: u64,
}

impl NotificationInbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn unread(&self) -> u64 {
        self.unread
    }

    #[must_use]
    pub fn snapshot(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn seed_unread(&mut self, count: u64) {
        self.unread = count;
    }

    /// Replaces the list with an authoritative fetch and recomputes the
    /// unread count from it.
    pub fn replace_all(&mut self, mut notifications: Vec<Notification>) {
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let unread = notifications
            .iter()
            .filter(|notification| !notification.read)
            .count();
        self.unread = u64::try_from(unread).unwrap_or(u64::MAX);
        self.notifications = notifications;
    }

    /// Prepends a pushed notification. Re-delivery of an id already held is
    /// a no-op.
    pub fn apply_insert(&mut self, notification: Notification) -> bool {
        if self
            .notifications
            .iter()
            .any(|held| held.id == notification.id)
        {
            return false;
        }
        if !notification.read {
            self.unread += 1;
        }
        self.notifications.insert(0, notification);
        true
    }

    /// Marks one notification read, typically echoed from another device.
    /// Unknown or already-read ids leave the count untouched.
    pub fn apply_read(&mut self, id: Id<NotificationMarker>) -> bool {
        match self
            .notifications
            .iter_mut()
            .find(|held| held.id == id && !held.read)
        {
            Some(notification) => {
                notification.read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in &mut self.notifications {
            notification.read = true;
        }
        self.unread = 0;
    }
}
