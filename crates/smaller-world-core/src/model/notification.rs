//! Notifications: one record per (noticeable, recipient) pair.

use crate::ids::NotificationId;
use crate::model::{Noticeable, Notifiable};
use crate::storage::impl_record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notice about a record, addressed to a user, a friend, or (when
/// `recipient` is `None`) to anonymous universe subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub noticeable: Noticeable,
    pub recipient: Option<Notifiable>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl_record!(Notification, NotificationId, "notifications", "notification");

impl Notification {
    #[must_use]
    pub fn new(noticeable: Noticeable, recipient: Option<Notifiable>, now: DateTime<Utc>) -> Self {
        Self {
            id: NotificationId::new(),
            noticeable,
            recipient,
            pushed_at: None,
            delivered_at: None,
            created_at: now,
        }
    }

    #[must_use]
    pub fn pushed(&self) -> bool {
        self.pushed_at.is_some()
    }

    #[must_use]
    pub fn delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    /// Notification type name (`Post`, `Friend`, ...).
    #[must_use]
    pub fn notification_type(&self) -> &'static str {
        self.noticeable.kind()
    }

    /// Type name understood by version 1 service workers.
    #[must_use]
    pub fn legacy_type(&self) -> &'static str {
        match (self.noticeable, self.recipient) {
            (Noticeable::Post(_), None) => "UniversePost",
            (noticeable, _) => noticeable.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FriendId, PostId};

    #[test]
    fn legacy_types() {
        let now = Utc::now();
        let post = Noticeable::Post(PostId::new());
        let friend = Some(Notifiable::Friend(FriendId::new()));
        assert_eq!(Notification::new(post, friend, now).legacy_type(), "Post");
        assert_eq!(Notification::new(post, None, now).legacy_type(), "UniversePost");
        assert_eq!(Notification::new(post, None, now).notification_type(), "Post");
    }
}
