//! Friends and the records that bring them into a world.

use crate::error::ValidationErrors;
use crate::ids::{ActivityId, EncouragementId, FriendId, InvitationId, JoinRequestId, UserId, WorldId};
use crate::model::PostType;
use crate::storage::impl_record;
use crate::validate::{is_emoji, normalize_phone_number};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Length of a friend's access token.
pub const ACCESS_TOKEN_LENGTH: usize = 24;

/// Maximum length of an encouragement message.
pub const MAX_ENCOURAGEMENT_LENGTH: usize = 240;

// =============================================================================
// FRIEND
// =============================================================================

/// Someone invited into a world. Friends never sign in; they carry an
/// access token in the links they are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub id: FriendId,
    pub user_id: UserId,
    pub name: String,
    pub emoji: Option<String>,
    pub phone_number: Option<String>,
    pub access_token: String,
    pub chosen_family: bool,
    pub paused_since: Option<DateTime<Utc>>,
    pub subscribed_post_types: Vec<PostType>,
    pub notifications_last_cleared_at: Option<DateTime<Utc>>,
    pub invitation_id: Option<InvitationId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(Friend, FriendId, "friends", "friend");

impl Friend {
    #[must_use]
    pub fn new(user_id: UserId, name: &str, emoji: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            id: FriendId::new(),
            user_id,
            name: name.trim().to_owned(),
            emoji: emoji.map(str::trim).filter(|e| !e.is_empty()).map(str::to_owned),
            phone_number: None,
            access_token: generate_access_token(),
            chosen_family: false,
            paused_since: None,
            subscribed_post_types: PostType::ALL.to_vec(),
            notifications_last_cleared_at: None,
            invitation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validation that needs only this record. Name and phone uniqueness
    /// within the world are checked by the service layer.
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.name.is_empty() {
            errors.add("name", "can't be blank");
        }
        if let Some(emoji) = &self.emoji
            && !is_emoji(emoji)
        {
            errors.add("emoji", "is not an emoji");
        }
        if let Some(number) = &self.phone_number
            && normalize_phone_number(number).as_deref() != Some(number.as_str())
        {
            errors.add("phone_number", "is invalid");
        }
        errors
    }

    /// Name prefixed with the friend's emoji, if any.
    #[must_use]
    pub fn fun_name(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("{emoji} {}", self.name),
            None => self.name.clone(),
        }
    }

    #[must_use]
    pub fn paused(&self) -> bool {
        self.paused_since.is_some()
    }

    #[must_use]
    pub fn subscribed_to(&self, post_type: PostType) -> bool {
        self.subscribed_post_types.contains(&post_type)
    }

    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.notifications_last_cleared_at.unwrap_or(self.created_at)
    }
}

/// Random alphanumeric token, in the style of `has_secure_token`.
#[must_use]
pub fn generate_access_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

// =============================================================================
// INVITATION
// =============================================================================

/// An invite link for someone who is not a friend yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub world_id: WorldId,
    pub invitee_name: String,
    pub invitee_emoji: Option<String>,
    pub offered_activity_ids: Vec<ActivityId>,
    pub join_request_id: Option<JoinRequestId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(Invitation, InvitationId, "invitations", "invitation");

impl Invitation {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.invitee_name.trim().is_empty() {
            errors.add("invitee_name", "can't be blank");
        }
        if let Some(emoji) = &self.invitee_emoji
            && !is_emoji(emoji)
        {
            errors.add("invitee_emoji", "is not an emoji");
        }
        errors
    }
}

// =============================================================================
// JOIN REQUEST
// =============================================================================

/// A stranger asking to join a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: JoinRequestId,
    pub world_id: WorldId,
    pub name: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(JoinRequest, JoinRequestId, "join_requests", "join request");

impl JoinRequest {
    #[must_use]
    pub fn new(world_id: WorldId, name: &str, phone_number: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: JoinRequestId::new(),
            world_id,
            name: name.trim().to_owned(),
            phone_number: normalize_phone_number(phone_number)
                .unwrap_or_else(|| phone_number.trim().to_owned()),
            created_at: now,
        }
    }

    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.name.is_empty() {
            errors.add("name", "can't be blank");
        }
        if self.phone_number.is_empty() {
            errors.add("phone_number", "can't be blank");
        } else if normalize_phone_number(&self.phone_number).as_deref()
            != Some(self.phone_number.as_str())
        {
            errors.add("phone_number", "is invalid");
        }
        errors
    }
}

// =============================================================================
// ENCOURAGEMENT
// =============================================================================

/// A nudge from a friend asking the world owner to post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encouragement {
    pub id: EncouragementId,
    pub friend_id: FriendId,
    pub emoji: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(Encouragement, EncouragementId, "encouragements", "encouragement");

impl Encouragement {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if !is_emoji(&self.emoji) {
            errors.add("emoji", "is not an emoji");
        }
        let message = self.message.trim();
        if message.is_empty() {
            errors.add("message", "can't be blank");
        } else if message.chars().count() > MAX_ENCOURAGEMENT_LENGTH {
            errors.add(
                "message",
                format!("is too long (maximum is {MAX_ENCOURAGEMENT_LENGTH} characters)"),
            );
        }
        errors
    }
}
