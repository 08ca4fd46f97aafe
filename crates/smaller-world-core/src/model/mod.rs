//! # Model
//!
//! Persistent records and the small enums they share.
//!
//! Records are plain data. Validation that only needs the record itself
//! lives here (`validate`); checks that need other records (uniqueness,
//! rate windows) live in the service layer.

mod activity;
mod friend;
mod login;
mod notification;
mod post;
mod push;
mod user;

pub use activity::{Activity, ActivityCoupon};
pub use friend::{Encouragement, Friend, Invitation, JoinRequest};
pub use login::LoginRequest;
pub use notification::Notification;
pub use post::{
    Position, Post, PostReaction, PostReplyReceipt, PostShare, PostSticker, PostView, TextBlast,
};
pub use push::{PushRegistration, PushSubscription};
pub use user::{Session, User, World};

use crate::ids::{
    ActivityCouponId, EncouragementId, FriendId, JoinRequestId, PostId, UserId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// POST TYPE
// =============================================================================

/// Kind of post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    JournalEntry,
    Poem,
    Invitation,
    Question,
    FollowUp,
}

impl PostType {
    pub const ALL: [PostType; 5] = [
        PostType::JournalEntry,
        PostType::Poem,
        PostType::Invitation,
        PostType::Question,
        PostType::FollowUp,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JournalEntry => "journal_entry",
            Self::Poem => "poem",
            Self::Invitation => "invitation",
            Self::Question => "question",
            Self::FollowUp => "follow_up",
        }
    }

    /// Lowercase human form (`journal entry`).
    #[must_use]
    pub fn humanize(self) -> String {
        crate::text::humanize(self.as_str())
    }

    /// Whether posts of this type carry a title.
    #[must_use]
    pub fn title_visible(self) -> bool {
        matches!(self, Self::JournalEntry | Self::Poem | Self::Invitation)
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown post type: {s}"))
    }
}

// =============================================================================
// VISIBILITY
// =============================================================================

/// Audience of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone, including anonymous universe visitors.
    Public,
    /// Every friend of the author.
    Friends,
    /// Friends marked as chosen family.
    ChosenFamily,
    /// Only the friends listed in `visible_to_ids`.
    Secret,
    /// Nobody but the author.
    OnlyMe,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Friends => "friends",
            Self::ChosenFamily => "chosen_family",
            Self::Secret => "secret",
            Self::OnlyMe => "only_me",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// POLYMORPHIC REFERENCES
// =============================================================================

/// Something that can receive notifications and own push registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notifiable {
    User(UserId),
    Friend(FriendId),
}

impl Notifiable {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::User(_) => "User",
            Self::Friend(_) => "Friend",
        }
    }

    #[must_use]
    pub fn as_friend(self) -> Option<FriendId> {
        match self {
            Self::Friend(id) => Some(id),
            Self::User(_) => None,
        }
    }

    #[must_use]
    pub fn as_user(self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Friend(_) => None,
        }
    }
}

/// The record a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Noticeable {
    Post(PostId),
    Friend(FriendId),
    Encouragement(EncouragementId),
    JoinRequest(JoinRequestId),
    ActivityCoupon(ActivityCouponId),
}

impl Noticeable {
    /// Record type name, used as the notification `type`.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Post(_) => "Post",
            Self::Friend(_) => "Friend",
            Self::Encouragement(_) => "Encouragement",
            Self::JoinRequest(_) => "JoinRequest",
            Self::ActivityCoupon(_) => "ActivityCoupon",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_types_parse_and_humanize() {
        assert_eq!("follow_up".parse::<PostType>(), Ok(PostType::FollowUp));
        assert!("essay".parse::<PostType>().is_err());
        assert_eq!(PostType::JournalEntry.humanize(), "journal entry");
        assert!(PostType::Poem.title_visible());
        assert!(!PostType::Question.title_visible());
    }

    #[test]
    fn enums_serialize_snake_case() {
        let json = serde_json::to_string(&Visibility::ChosenFamily).unwrap_or_default();
        assert_eq!(json, "\"chosen_family\"");
        let json = serde_json::to_string(&PostType::JournalEntry).unwrap_or_default();
        assert_eq!(json, "\"journal_entry\"");
    }
}
