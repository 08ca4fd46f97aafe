//! # Services
//!
//! Domain operations over a [`Store`].
//!
//! Operations are synchronous and never perform I/O beyond the store. When
//! something has to happen outside (a push, an SMS, a delayed job) they
//! return it as an [`Effect`] in their [`Outcome`], and the caller decides
//! how to run it. Time is always passed in as `now`.

pub mod auth;
pub mod coupons;
pub mod feed;
pub mod friends;
pub mod posts;
pub mod push;
pub mod streak;

use crate::error::{Error, Result};
use crate::ids::{NotificationId, TextBlastId, UserId};
use crate::links::Links;
use crate::model::{
    Friend, Noticeable, Notifiable, Notification, PushRegistration, User, World,
};
use crate::storage::{Store, StoreExt};
use crate::token::Signer;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// CONTEXT
// =============================================================================

/// Deployment settings the domain needs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Delay before a post notification is pushed, so quick edits settle.
    pub notification_delay: Duration,
    /// Handles of worlds whose owners get a notification for every public post.
    pub public_post_subscriber_handles: Vec<String>,
    /// Phone numbers of admin users.
    pub admin_phone_numbers: Vec<String>,
    /// Login code that works for every phone number, if set.
    pub special_occasion_code: Option<String>,
    /// Send login codes by SMS. Off in development.
    pub deliver_login_codes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notification_delay: Duration::from_secs(60),
            public_post_subscriber_handles: Vec::new(),
            admin_phone_numbers: Vec::new(),
            special_occasion_code: None,
            deliver_login_codes: true,
        }
    }
}

/// Everything a domain operation needs.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub store: &'a dyn Store,
    pub links: &'a Links,
    pub signer: &'a Signer,
    pub settings: &'a Settings,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("links", self.links)
            .field("settings", self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> Context<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn Store,
        links: &'a Links,
        signer: &'a Signer,
        settings: &'a Settings,
    ) -> Self {
        Self {
            store,
            links,
            signer,
            settings,
        }
    }

    /// The world owned by a user.
    pub fn world_of(&self, user_id: UserId) -> Result<World> {
        self.store
            .find::<World>(|w| w.owner_id == user_id)?
            .ok_or_else(|| Error::not_found("world", user_id))
    }

    /// A world by handle.
    pub fn world_by_handle(&self, handle: &str) -> Result<World> {
        let handle = handle.trim().to_lowercase();
        self.store
            .find::<World>(|w| w.handle == handle)?
            .ok_or_else(|| Error::not_found("world", handle))
    }

    /// A friend by access token. Comparison is constant time.
    pub fn friend_by_token(&self, token: &str) -> Result<Option<Friend>> {
        use subtle::ConstantTimeEq;
        self.store.find::<Friend>(|f| {
            bool::from(f.access_token.as_bytes().ct_eq(token.as_bytes()))
        })
    }

    #[must_use]
    pub fn is_admin(&self, user: &User) -> bool {
        self.settings
            .admin_phone_numbers
            .iter()
            .any(|number| number == &user.phone_number)
    }

    /// Owners of worlds subscribed to every public post.
    pub fn public_post_subscribers(&self) -> Result<Vec<User>> {
        let handles = &self.settings.public_post_subscriber_handles;
        let mut users = Vec::new();
        for world in self.store.filter::<World>(|w| handles.contains(&w.handle))? {
            if let Some(user) = self.store.get::<User>(world.owner_id)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Push registrations owned by a notifiable (or the anonymous owner).
    pub fn registrations_of(&self, owner: Option<Notifiable>) -> Result<Vec<PushRegistration>> {
        self.store.filter::<PushRegistration>(|r| r.owner == owner)
    }

    /// Whether a notifiable has at least one push registration.
    pub fn notifiable(&self, owner: Notifiable) -> Result<bool> {
        Ok(self
            .store
            .find::<PushRegistration>(|r| r.owner == Some(owner))?
            .is_some())
    }
}

// =============================================================================
// EFFECTS
// =============================================================================

/// Work for the caller to carry out after an operation succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Push a notification to its recipient's devices.
    PushNotification { id: NotificationId, delay: Duration },
    /// Send a post to a text-only friend by SMS.
    SendTextBlast { id: TextBlastId, delay: Duration },
    /// Send an SMS.
    SendSms { to: String, body: String },
}

/// An operation's result plus the effects it requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub effects: Vec<Effect>,
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn new(value: T, effects: Vec<Effect>) -> Self {
        Self { value, effects }
    }

    #[must_use]
    pub fn pure(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            effects: self.effects,
        }
    }
}

/// Create a notification and request its push.
pub fn notify(
    ctx: &Context<'_>,
    noticeable: Noticeable,
    recipient: Option<Notifiable>,
    delay: Duration,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) -> Result<Notification> {
    let notification = Notification::new(noticeable, recipient, now);
    ctx.store.put(&notification)?;
    effects.push(Effect::PushNotification {
        id: notification.id,
        delay,
    });
    Ok(notification)
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Keyset position: newest first, ties broken by ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    /// Whether a row at (`created_at`, `id`) comes after this cursor.
    #[must_use]
    pub fn precedes(&self, created_at: DateTime<Utc>, id: Uuid) -> bool {
        created_at < self.created_at || (created_at == self.created_at && id > self.id)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.created_at.timestamp_micros(), self.id)
    }
}

impl FromStr for Cursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            let mut errors = crate::error::ValidationErrors::new();
            errors.add("cursor", "is invalid");
            Error::Invalid(errors)
        };
        let (micros, id) = s.split_once('_').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self { created_at, id })
    }
}

/// One page of a keyset-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

/// Sort newest first and cut one page after `cursor`.
pub fn paginate<T>(
    mut rows: Vec<T>,
    key: impl Fn(&T) -> (DateTime<Utc>, Uuid),
    cursor: Option<Cursor>,
    limit: usize,
) -> Page<T> {
    rows.sort_by(|a, b| {
        let (a_at, a_id) = key(a);
        let (b_at, b_id) = key(b);
        b_at.cmp(&a_at).then(a_id.cmp(&b_id))
    });
    let mut rows: Vec<T> = rows
        .into_iter()
        .filter(|row| {
            let (at, id) = key(row);
            cursor.is_none_or(|c| c.precedes(at, id))
        })
        .collect();
    let limit = limit.max(1);
    let has_more = rows.len() > limit;
    rows.truncate(limit);
    let next_cursor = if has_more {
        rows.last().map(|row| {
            let (created_at, id) = key(row);
            Cursor { created_at, id }
        })
    } else {
        None
    };
    Page {
        items: rows,
        next_cursor,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for service tests.

    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    pub struct Harness {
        pub store: MemoryStore,
        pub links: Links,
        pub signer: Signer,
        pub settings: Settings,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                links: Links::new("https://smallerworld.club", Some("https://smlr.club")).unwrap(),
                signer: Signer::new("test secret"),
                settings: Settings {
                    notification_delay: Duration::from_secs(60),
                    public_post_subscriber_handles: Vec::new(),
                    admin_phone_numbers: Vec::new(),
                    special_occasion_code: None,
                    deliver_login_codes: true,
                },
            }
        }

        pub fn ctx(&self) -> Context<'_> {
            Context::new(&self.store, &self.links, &self.signer, &self.settings)
        }
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    /// A user with a world, created at `t0`.
    pub fn user(ctx: &Context<'_>, name: &str, phone: &str, handle: &str) -> (User, World) {
        let outcome = auth::create_user(
            ctx,
            &auth::NewUser {
                name: name.to_owned(),
                phone_number: phone.to_owned(),
                time_zone_name: "America/New_York".to_owned(),
                handle: handle.to_owned(),
            },
            t0(),
        )
        .unwrap();
        outcome.value
    }

    /// A friend of `user`, optionally with a phone number.
    pub fn friend(ctx: &Context<'_>, user: &User, name: &str, phone: Option<&str>) -> Friend {
        let mut friend = Friend::new(user.id, name, None, t0());
        friend.phone_number = phone.map(str::to_owned);
        ctx.store.put(&friend).unwrap();
        friend
    }

    /// Give an owner a push registration.
    pub fn register_device(ctx: &Context<'_>, owner: Notifiable) -> PushRegistration {
        let outcome = push::register_subscription(
            ctx,
            Some(owner),
            &push::SubscriptionParams {
                endpoint: format!("https://push.example.com/{}", Uuid::new_v4()),
                p256dh_key: "p256dh".to_owned(),
                auth_key: "auth".to_owned(),
                service_worker_version: Some(2),
                device_id: None,
                device_fingerprint: None,
                device_fingerprint_confidence: None,
            },
            t0(),
        )
        .unwrap();
        outcome.value.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cursor_roundtrip() {
        let cursor = Cursor {
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            id: Uuid::new_v4(),
        };
        let parsed: Cursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
        assert!("nope".parse::<Cursor>().is_err());
    }

    #[test]
    fn paginates_newest_first() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let rows: Vec<(DateTime<Utc>, Uuid)> = (0..7)
            .map(|i| (base + chrono::Duration::minutes(i), Uuid::new_v4()))
            .collect();
        let first = paginate(rows.clone(), |r| *r, None, 5);
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.items[0].0, base + chrono::Duration::minutes(6));
        let second = paginate(rows, |r| *r, first.next_cursor, 5);
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());
        assert_eq!(second.items[1].0, base);
    }

    #[test]
    fn ties_break_by_id() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let rows: Vec<(DateTime<Utc>, Uuid)> = ids.iter().map(|id| (at, *id)).collect();
        let first = paginate(rows.clone(), |r| *r, None, 2);
        assert_eq!(first.items, vec![(at, ids[0]), (at, ids[1])]);
        let second = paginate(rows, |r| *r, first.next_cursor, 2);
        assert_eq!(second.items, vec![(at, ids[2])]);
    }
}
