//! Activities and the coupons friends get for them.

use super::{Context, Outcome, notify};
use crate::error::{Error, Result};
use crate::ids::{ActivityCouponId, ActivityId, FriendId};
use crate::model::{Activity, ActivityCoupon, Friend, Noticeable, Notifiable, Notification, User};
use crate::storage::StoreExt;
use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Days between reminders for the same coupon.
pub const REMINDER_INTERVAL_DAYS: i64 = 7;

/// Local hour reminders go out at.
pub const REMINDER_HOUR: u32 = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityParams {
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub description: String,
}

pub fn create_activity(
    ctx: &Context<'_>,
    user: &User,
    params: &ActivityParams,
    now: DateTime<Utc>,
) -> Result<Activity> {
    let world = ctx.world_of(user.id)?;
    let activity = Activity {
        id: ActivityId::new(),
        world_id: world.id,
        name: params.name.trim().to_owned(),
        emoji: params
            .emoji
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned),
        description: params.description.trim().to_owned(),
        created_at: now,
    };
    activity.validate().into_result()?;
    ctx.store.put(&activity)?;
    Ok(activity)
}

/// The world's activities, oldest first.
pub fn activities(ctx: &Context<'_>, user: &User) -> Result<Vec<Activity>> {
    let world = ctx.world_of(user.id)?;
    let mut activities = ctx.store.filter::<Activity>(|a| a.world_id == world.id)?;
    activities.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(activities)
}

/// Give a friend a coupon for one of the user's activities. Friends with a
/// device hear about it right away.
pub fn issue_coupon(
    ctx: &Context<'_>,
    user: &User,
    friend_id: FriendId,
    activity_id: ActivityId,
    now: DateTime<Utc>,
) -> Result<Outcome<ActivityCoupon>> {
    let world = ctx.world_of(user.id)?;
    let friend: Friend = ctx.store.fetch(friend_id)?;
    let activity: Activity = ctx.store.fetch(activity_id)?;
    if friend.user_id != user.id || activity.world_id != world.id {
        return Err(Error::Forbidden);
    }
    let coupon = ActivityCoupon::issue(friend.id, activity.id, now);
    ctx.store.put(&coupon)?;

    let mut effects = Vec::new();
    let recipient = Notifiable::Friend(friend.id);
    if ctx.notifiable(recipient)? {
        notify(
            ctx,
            Noticeable::ActivityCoupon(coupon.id),
            Some(recipient),
            StdDuration::ZERO,
            now,
            &mut effects,
        )?;
    }
    Ok(Outcome::new(coupon, effects))
}

/// A friend's unexpired coupons with their activities, soonest expiry first.
pub fn active_coupons(
    ctx: &Context<'_>,
    friend: &Friend,
    now: DateTime<Utc>,
) -> Result<Vec<(ActivityCoupon, Activity)>> {
    let mut coupons = ctx
        .store
        .filter::<ActivityCoupon>(|c| c.friend_id == friend.id && c.active(now))?;
    coupons.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
    let mut with_activities = Vec::with_capacity(coupons.len());
    for coupon in coupons {
        if let Some(activity) = ctx.store.get::<Activity>(coupon.activity_id)? {
            with_activities.push((coupon, activity));
        }
    }
    Ok(with_activities)
}

fn notified_recently(ctx: &Context<'_>, coupon_id: ActivityCouponId, now: DateTime<Utc>) -> Result<bool> {
    let since = now - Duration::days(REMINDER_INTERVAL_DAYS);
    Ok(ctx
        .store
        .find::<Notification>(|n| {
            n.noticeable == Noticeable::ActivityCoupon(coupon_id) && n.created_at > since
        })?
        .is_some())
}

/// Active coupons nobody was reminded about in the last week.
pub fn coupons_due_for_reminder(ctx: &Context<'_>, now: DateTime<Utc>) -> Result<Vec<ActivityCoupon>> {
    let mut due = Vec::new();
    for coupon in ctx.store.filter::<ActivityCoupon>(|c| c.active(now))? {
        if !notified_recently(ctx, coupon.id, now)? {
            due.push(coupon);
        }
    }
    due.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(due)
}

/// The next 8am in `tz` strictly after `now`.
#[must_use]
pub fn next_reminder_at(tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let reminder_time = NaiveTime::from_hms_opt(REMINDER_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut date = local_now.date_naive();
    if local_now.time() >= reminder_time {
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
    }
    // A gap at 8am (DST switch) resolves to the first valid instant after it.
    tz.from_local_datetime(&date.and_time(reminder_time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(24))
}

/// A reminder to run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPlan {
    pub coupon_id: ActivityCouponId,
    pub run_at: DateTime<Utc>,
}

/// Plan reminders for every due coupon at the next 8am in the world
/// owner's time zone.
pub fn schedule_reminders(ctx: &Context<'_>, now: DateTime<Utc>) -> Result<Vec<ReminderPlan>> {
    let mut plans = Vec::new();
    for coupon in coupons_due_for_reminder(ctx, now)? {
        let Some(friend) = ctx.store.get::<Friend>(coupon.friend_id)? else {
            continue;
        };
        let Some(owner) = ctx.store.get::<User>(friend.user_id)? else {
            continue;
        };
        plans.push(ReminderPlan {
            coupon_id: coupon.id,
            run_at: next_reminder_at(owner.time_zone(), now),
        });
    }
    Ok(plans)
}

/// Remind a friend about a coupon, unless it expired or they were reminded
/// in the meantime.
pub fn send_coupon_reminder(
    ctx: &Context<'_>,
    coupon_id: ActivityCouponId,
    now: DateTime<Utc>,
) -> Result<Outcome<Option<Notification>>> {
    let Some(coupon) = ctx.store.get::<ActivityCoupon>(coupon_id)? else {
        return Ok(Outcome::pure(None));
    };
    if !coupon.active(now) || notified_recently(ctx, coupon.id, now)? {
        return Ok(Outcome::pure(None));
    }
    let mut effects = Vec::new();
    let notification = notify(
        ctx,
        Noticeable::ActivityCoupon(coupon.id),
        Some(Notifiable::Friend(coupon.friend_id)),
        StdDuration::ZERO,
        now,
        &mut effects,
    )?;
    Ok(Outcome::new(Some(notification), effects))
}
