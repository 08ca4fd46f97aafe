//! Users, their worlds and browser sessions.

use crate::error::ValidationErrors;
use crate::ids::{SessionId, UserId, WorldId};
use crate::storage::impl_record;
use crate::validate::normalize_phone_number;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Maximum length of a user's display name.
pub const MAX_NAME_LENGTH: usize = 30;

/// Minimum length of a world handle.
pub const MIN_HANDLE_LENGTH: usize = 2;

/// Handles that collide with routes or are otherwise taken.
pub const RESERVED_HANDLES: &[&str] = &["kai", "world", "universe", "login", "logout", "admin"];

// =============================================================================
// USER
// =============================================================================

/// A registered account. Every user owns exactly one [`World`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// E.164, unique across users.
    pub phone_number: String,
    /// IANA time zone name.
    pub time_zone_name: String,
    pub allow_friend_sharing: bool,
    pub notifications_last_cleared_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(User, UserId, "users", "user");

impl User {
    /// Build a user with normalized fields. Call [`User::validate`] before saving.
    #[must_use]
    pub fn new(name: &str, phone_number: &str, time_zone_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name: name.trim().to_owned(),
            phone_number: normalize_phone_number(phone_number)
                .unwrap_or_else(|| phone_number.trim().to_owned()),
            time_zone_name: time_zone_name.trim().to_owned(),
            allow_friend_sharing: true,
            notifications_last_cleared_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.name.is_empty() {
            errors.add("name", "can't be blank");
        } else if self.name.chars().count() > MAX_NAME_LENGTH {
            errors.add("name", format!("is too long (maximum is {MAX_NAME_LENGTH} characters)"));
        }
        if normalize_phone_number(&self.phone_number).as_deref() != Some(self.phone_number.as_str()) {
            errors.add("phone_number", "is invalid");
        }
        if self.time_zone_name.parse::<Tz>().is_err() {
            errors.add("time_zone_name", "is not a valid time zone");
        }
        errors
    }

    /// The user's time zone, falling back to UTC for unknown names.
    #[must_use]
    pub fn time_zone(&self) -> Tz {
        self.time_zone_name.parse().unwrap_or(Tz::UTC)
    }

    /// Possessive form of the name (`kai's`, `james'`).
    #[must_use]
    pub fn possessive_name(&self) -> String {
        if self.name.ends_with('s') {
            format!("{}'", self.name)
        } else {
            format!("{}'s", self.name)
        }
    }
}

// =============================================================================
// WORLD
// =============================================================================

/// A user's personal space, addressed by its handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: WorldId,
    pub owner_id: UserId,
    pub handle: String,
    /// Page icon shown in push notifications and the installed app.
    pub icon_url: Option<String>,
    pub reply_to_number_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(World, WorldId, "worlds", "world");

impl World {
    #[must_use]
    pub fn new(owner: &User, handle: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: WorldId::new(),
            owner_id: owner.id,
            handle: handle.trim().to_lowercase(),
            icon_url: None,
            reply_to_number_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.handle.is_empty() {
            errors.add("handle", "can't be blank");
        } else if self.handle.chars().count() < MIN_HANDLE_LENGTH {
            errors.add("handle", format!("is too short (minimum is {MIN_HANDLE_LENGTH} characters)"));
        } else if !is_slug(&self.handle) {
            errors.add("handle", "may only contain lowercase letters, numbers and dashes");
        } else if RESERVED_HANDLES.contains(&self.handle.as_str()) {
            errors.add("handle", "is reserved");
        }
        if let Some(number) = &self.reply_to_number_override
            && normalize_phone_number(number).as_deref() != Some(number.as_str())
        {
            errors.add("reply_to_number_override", "is invalid");
        }
        errors
    }

    /// Display name (`kai's world`).
    #[must_use]
    pub fn name(&self, owner: &User) -> String {
        format!("{}'s world", owner.name)
    }

    /// Number friends should reply to.
    #[must_use]
    pub fn reply_to_number<'a>(&'a self, owner: &'a User) -> &'a str {
        self.reply_to_number_override
            .as_deref()
            .unwrap_or(&owner.phone_number)
    }
}

fn is_slug(handle: &str) -> bool {
    !handle.starts_with('-')
        && !handle.ends_with('-')
        && handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// =============================================================================
// SESSION
// =============================================================================

/// A signed-in browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(Session, SessionId, "sessions", "session");

impl Session {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.ip_address.trim().is_empty() {
            errors.add("ip_address", "can't be blank");
        }
        if self.user_agent.trim().is_empty() {
            errors.add("user_agent", "can't be blank");
        }
        errors
    }
}
