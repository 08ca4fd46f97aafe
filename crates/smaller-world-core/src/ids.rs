//! # Identifiers
//!
//! Typed UUID newtypes for every record kind, so a `FriendId` can never be
//! passed where a `UserId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                /// Generate a fresh random identifier.
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// The underlying UUID.
                #[must_use]
                pub fn as_uuid(&self) -> Uuid {
                    self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }

            impl From<Uuid> for $name {
                fn from(value: Uuid) -> Self {
                    Self(value)
                }
            }

            impl From<$name> for Uuid {
                fn from(value: $name) -> Self {
                    value.0
                }
            }
        )+
    };
}

define_id!(
    /// A registered user (world owner).
    UserId,
    /// A user's world.
    WorldId,
    /// A signed-in browser session.
    SessionId,
    /// A friend invited into a world.
    FriendId,
    PostId,
    NotificationId,
    PushSubscriptionId,
    PushRegistrationId,
    ActivityId,
    ActivityCouponId,
    EncouragementId,
    InvitationId,
    JoinRequestId,
    LoginRequestId,
    TextBlastId,
    PostViewId,
    PostReplyReceiptId,
    PostReactionId,
    PostStickerId,
    PostShareId,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_through_strings() {
        let id = PostId::new();
        let parsed: PostId = id.to_string().parse().unwrap_or_default();
        assert_eq!(parsed, id);
    }

    #[test]
    fn invalid_id_string_is_rejected() {
        assert!("not-a-uuid".parse::<FriendId>().is_err());
    }
}
