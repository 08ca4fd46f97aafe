//! Activities a world owner offers, and the coupons friends hold for them.

use crate::error::ValidationErrors;
use crate::ids::{ActivityCouponId, ActivityId, FriendId, WorldId};
use crate::storage::impl_record;
use crate::validate::is_emoji;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub world_id: WorldId,
    pub name: String,
    pub emoji: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl_record!(Activity, ActivityId, "activities", "activity");

impl Activity {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "can't be blank");
        }
        if let Some(emoji) = &self.emoji
            && !is_emoji(emoji)
        {
            errors.add("emoji", "is not an emoji");
        }
        errors
    }

    /// Name prefixed with the activity's emoji, if any.
    #[must_use]
    pub fn fun_name(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("{emoji} {}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A friend's redeemable offer to do an activity with the world owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCoupon {
    pub id: ActivityCouponId,
    pub friend_id: FriendId,
    pub activity_id: ActivityId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl_record!(ActivityCoupon, ActivityCouponId, "activity_coupons", "activity coupon");

impl ActivityCoupon {
    /// Issue a coupon that expires one month from `now`.
    #[must_use]
    pub fn issue(friend_id: FriendId, activity_id: ActivityId, now: DateTime<Utc>) -> Self {
        Self {
            id: ActivityCouponId::new(),
            friend_id,
            activity_id,
            expires_at: now.checked_add_months(Months::new(1)).unwrap_or(now),
            created_at: now,
        }
    }

    #[must_use]
    pub fn active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn coupons_expire_after_a_month() {
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let coupon = ActivityCoupon::issue(FriendId::new(), ActivityId::new(), now);
        assert_eq!(
            coupon.expires_at,
            Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap()
        );
        assert!(coupon.active(now));
        assert!(!coupon.active(coupon.expires_at));
    }
}
