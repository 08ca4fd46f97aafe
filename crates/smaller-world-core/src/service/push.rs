//! # Push
//!
//! Push subscription lifecycle and notification delivery planning.
//!
//! A browser push endpoint is a [`PushSubscription`]. The same device can
//! be registered by several owners (the user and a friend sharing a phone,
//! or an anonymous universe visitor), one [`PushRegistration`] per owner.
//! Deliveries are planned here and sent by the app's push gateway.

use super::{Context, Effect, Outcome, notify};
use crate::error::{Error, Result};
use crate::ids::{NotificationId, PushRegistrationId, PushSubscriptionId, TextBlastId};
use crate::model::{
    Activity, ActivityCoupon, Encouragement, Friend, JoinRequest, Noticeable, Notifiable,
    Notification, Post, PushRegistration, PushSubscription, TextBlast, User, World,
};
use crate::notice::{Recipient, Subject, post_text_message};
use crate::payload::{self, Urgency};
use crate::storage::StoreExt;
use crate::token::{Purpose, delivery_fingerprint};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Subscription details posted by the service worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionParams {
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    #[serde(default)]
    pub service_worker_version: Option<u32>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    #[serde(default)]
    pub device_fingerprint_confidence: Option<f64>,
}

/// One web push to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PushDelivery {
    pub subscription: PushSubscription,
    pub payload: Value,
    pub urgency: Urgency,
}

/// One SMS to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub to: String,
    pub body: String,
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Find or create the subscription for an endpoint and register it to an
/// owner.
///
/// A friend's first registration tells the world owner the friend installed
/// their world, and their active coupons that were never announced get a
/// notification.
pub fn register_subscription(
    ctx: &Context<'_>,
    owner: Option<Notifiable>,
    params: &SubscriptionParams,
    now: DateTime<Utc>,
) -> Result<Outcome<(PushSubscription, PushRegistration)>> {
    let endpoint = params.endpoint.trim();
    let mut subscription = match ctx
        .store
        .find::<PushSubscription>(|s| s.endpoint == endpoint)?
    {
        Some(existing) => existing,
        None => PushSubscription {
            id: PushSubscriptionId::new(),
            endpoint: endpoint.to_owned(),
            p256dh_key: String::new(),
            auth_key: String::new(),
            service_worker_version: None,
            created_at: now,
            updated_at: now,
        },
    };
    subscription.p256dh_key = params.p256dh_key.trim().to_owned();
    subscription.auth_key = params.auth_key.trim().to_owned();
    if params.service_worker_version.is_some() {
        subscription.service_worker_version = params.service_worker_version;
    }
    subscription.updated_at = now;
    subscription.validate().into_result()?;

    let first_for_owner = match owner {
        Some(owner) => !ctx.notifiable(owner)?,
        None => false,
    };
    let subscription_id = subscription.id;
    let mut registration = match ctx
        .store
        .find::<PushRegistration>(|r| r.owner == owner && r.subscription_id == subscription_id)?
    {
        Some(existing) => existing,
        None => PushRegistration {
            id: PushRegistrationId::new(),
            owner,
            subscription_id,
            device_id: None,
            device_fingerprint: None,
            device_fingerprint_confidence: None,
            created_at: now,
        },
    };
    let new_registration = ctx.store.get::<PushRegistration>(registration.id)?.is_none();
    if params.device_id.is_some() {
        registration.device_id.clone_from(&params.device_id);
    }
    if params.device_fingerprint.is_some() {
        registration.device_fingerprint.clone_from(&params.device_fingerprint);
        registration.device_fingerprint_confidence = params.device_fingerprint_confidence;
    }

    ctx.store.put(&subscription)?;
    ctx.store.put(&registration)?;

    let mut effects = Vec::new();
    if new_registration && let Some(Notifiable::Friend(friend_id)) = owner {
        let friend: Friend = ctx.store.fetch(friend_id)?;
        if first_for_owner {
            notify(
                ctx,
                Noticeable::Friend(friend.id),
                Some(Notifiable::User(friend.user_id)),
                Duration::ZERO,
                now,
                &mut effects,
            )?;
        }
        announce_unnotified_coupons(ctx, &friend, now, &mut effects)?;
    }
    Ok(Outcome::new((subscription, registration), effects))
}

fn announce_unnotified_coupons(
    ctx: &Context<'_>,
    friend: &Friend,
    now: DateTime<Utc>,
    effects: &mut Vec<Effect>,
) -> Result<()> {
    let coupons = ctx
        .store
        .filter::<ActivityCoupon>(|c| c.friend_id == friend.id && c.active(now))?;
    for coupon in coupons {
        let noticeable = Noticeable::ActivityCoupon(coupon.id);
        if ctx
            .store
            .find::<Notification>(|n| n.noticeable == noticeable)?
            .is_none()
        {
            notify(
                ctx,
                noticeable,
                Some(Notifiable::Friend(friend.id)),
                Duration::ZERO,
                now,
                effects,
            )?;
        }
    }
    Ok(())
}

/// The owner's registration for an endpoint, if any.
pub fn lookup_subscription(
    ctx: &Context<'_>,
    owner: Option<Notifiable>,
    endpoint: &str,
) -> Result<Option<(PushSubscription, PushRegistration)>> {
    let endpoint = endpoint.trim();
    let Some(subscription) = ctx
        .store
        .find::<PushSubscription>(|s| s.endpoint == endpoint)?
    else {
        return Ok(None);
    };
    let registration = ctx.store.find::<PushRegistration>(|r| {
        r.owner == owner && r.subscription_id == subscription.id
    })?;
    Ok(registration.map(|registration| (subscription, registration)))
}

/// Remove the owner's registration for an endpoint. The subscription goes
/// with its last registration. Returns whether anything was removed.
pub fn unsubscribe(ctx: &Context<'_>, owner: Option<Notifiable>, endpoint: &str) -> Result<bool> {
    let Some((subscription, registration)) = lookup_subscription(ctx, owner, endpoint)? else {
        return Ok(false);
    };
    ctx.store.delete::<PushRegistration>(registration.id)?;
    if ctx
        .store
        .find::<PushRegistration>(|r| r.subscription_id == subscription.id)?
        .is_none()
    {
        ctx.store.delete::<PushSubscription>(subscription.id)?;
    }
    Ok(true)
}

/// Move a subscription to a new endpoint and keys, as browsers do when they
/// rotate a subscription.
pub fn change_subscription(
    ctx: &Context<'_>,
    old_endpoint: &str,
    params: &SubscriptionParams,
    now: DateTime<Utc>,
) -> Result<PushSubscription> {
    let old_endpoint = old_endpoint.trim();
    let mut subscription = ctx
        .store
        .find::<PushSubscription>(|s| s.endpoint == old_endpoint)?
        .ok_or_else(|| Error::not_found("push subscription", old_endpoint))?;
    subscription.endpoint = params.endpoint.trim().to_owned();
    subscription.p256dh_key = params.p256dh_key.trim().to_owned();
    subscription.auth_key = params.auth_key.trim().to_owned();
    if params.service_worker_version.is_some() {
        subscription.service_worker_version = params.service_worker_version;
    }
    subscription.updated_at = now;
    let mut errors = subscription.validate();
    let (id, endpoint) = (subscription.id, subscription.endpoint.clone());
    if ctx
        .store
        .find::<PushSubscription>(|s| s.id != id && s.endpoint == endpoint)?
        .is_some()
    {
        errors.add("endpoint", "has already been taken");
    }
    errors.into_result()?;
    ctx.store.put(&subscription)?;
    Ok(subscription)
}

/// Delete a subscription the push service reported as gone, along with
/// its registrations.
pub fn drop_subscription(ctx: &Context<'_>, subscription_id: PushSubscriptionId) -> Result<()> {
    for registration in ctx
        .store
        .filter::<PushRegistration>(|r| r.subscription_id == subscription_id)?
    {
        ctx.store.delete::<PushRegistration>(registration.id)?;
    }
    ctx.store.delete::<PushSubscription>(subscription_id)?;
    Ok(())
}

// =============================================================================
// DELIVERY PLANNING
// =============================================================================

/// Load the records a noticeable's messages mention.
pub fn load_subject(ctx: &Context<'_>, noticeable: Noticeable) -> Result<Subject> {
    Ok(match noticeable {
        Noticeable::Post(id) => {
            let post: Post = ctx.store.fetch(id)?;
            let author: User = ctx.store.fetch(post.author_id)?;
            let world = ctx.world_of(author.id)?;
            Subject::Post { post, author, world }
        }
        Noticeable::Friend(id) => {
            let friend: Friend = ctx.store.fetch(id)?;
            let installed = ctx.notifiable(Notifiable::Friend(friend.id))?;
            Subject::Friend { friend, installed }
        }
        Noticeable::Encouragement(id) => {
            let encouragement: Encouragement = ctx.store.fetch(id)?;
            let friend: Friend = ctx.store.fetch(encouragement.friend_id)?;
            Subject::Encouragement {
                encouragement,
                friend,
            }
        }
        Noticeable::JoinRequest(id) => Subject::JoinRequest {
            join_request: ctx.store.fetch::<JoinRequest>(id)?,
        },
        Noticeable::ActivityCoupon(id) => {
            let coupon: ActivityCoupon = ctx.store.fetch(id)?;
            let activity: Activity = ctx.store.fetch(coupon.activity_id)?;
            let friend: Friend = ctx.store.fetch(coupon.friend_id)?;
            let owner: User = ctx.store.fetch(friend.user_id)?;
            let world = ctx.world_of(owner.id)?;
            Subject::ActivityCoupon {
                coupon,
                activity,
                friend,
                owner,
                world,
            }
        }
    })
}

/// Load a notification recipient.
pub fn load_recipient(ctx: &Context<'_>, recipient: Option<Notifiable>) -> Result<Recipient> {
    Ok(match recipient {
        Some(Notifiable::User(id)) => Recipient::User(ctx.store.fetch(id)?),
        Some(Notifiable::Friend(id)) => Recipient::Friend(ctx.store.fetch(id)?),
        None => Recipient::Anonymous,
    })
}

/// Icon of the world a push owner belongs to.
fn page_icon_url(ctx: &Context<'_>, owner: Option<Notifiable>) -> Result<Option<String>> {
    let user_id = match owner {
        Some(Notifiable::User(id)) => id,
        Some(Notifiable::Friend(id)) => match ctx.store.get::<Friend>(id)? {
            Some(friend) => friend.user_id,
            None => return Ok(None),
        },
        None => return Ok(None),
    };
    Ok(ctx
        .store
        .find::<World>(|w| w.owner_id == user_id)?
        .and_then(|w| w.icon_url))
}

/// Notifications the recipient has not cleared.
fn badge_count(ctx: &Context<'_>, recipient: &Recipient) -> Result<Option<u64>> {
    let (owner, cleared_at) = match recipient {
        Recipient::User(user) => (Notifiable::User(user.id), user.notifications_last_cleared_at),
        Recipient::Friend(friend) => (
            Notifiable::Friend(friend.id),
            friend.notifications_last_cleared_at,
        ),
        Recipient::Anonymous => return Ok(None),
    };
    let unread = ctx.store.filter::<Notification>(|n| {
        n.recipient == Some(owner) && cleared_at.is_none_or(|cleared| n.created_at > cleared)
    })?;
    Ok(Some(unread.len() as u64))
}

fn urgency(noticeable: Noticeable) -> Urgency {
    match noticeable {
        Noticeable::Post(_) | Noticeable::Encouragement(_) | Noticeable::JoinRequest(_) => {
            Urgency::High
        }
        Noticeable::Friend(_) | Noticeable::ActivityCoupon(_) => Urgency::Normal,
    }
}

/// Pushes for every registration of a notification's recipient.
///
/// Current service workers get the rendered message; version 1 workers get
/// the legacy payload, or nothing when the noticeable has none.
pub fn plan_notification_pushes(
    ctx: &Context<'_>,
    notification_id: NotificationId,
) -> Result<Vec<PushDelivery>> {
    let notification: Notification = ctx.store.fetch(notification_id)?;
    let registrations = ctx.registrations_of(notification.recipient)?;
    if registrations.is_empty() {
        return Ok(Vec::new());
    }

    let subject = load_subject(ctx, notification.noticeable)?;
    let recipient = load_recipient(ctx, notification.recipient)?;
    let message = subject.message(&recipient, ctx.links)?;
    let legacy_payload = subject.legacy_payload(&recipient);
    let token = ctx.signer.sign(
        Purpose::Delivery,
        notification.id,
        delivery_fingerprint(notification.delivered()),
        None,
    );
    let badge_count = badge_count(ctx, &recipient)?;
    let page_icon_url = page_icon_url(ctx, notification.recipient)?;
    let urgency = urgency(notification.noticeable);

    let mut deliveries = Vec::new();
    for registration in registrations {
        let Some(subscription) = ctx
            .store
            .get::<PushSubscription>(registration.subscription_id)?
        else {
            continue;
        };
        let notification_json = if !subscription.legacy() {
            payload::notification_json(&notification, &message, Some(&token))
        } else if let Some(legacy) = &legacy_payload {
            payload::legacy_notification_json(&notification, legacy.clone(), Some(&token))
        } else {
            continue;
        };
        deliveries.push(PushDelivery {
            subscription,
            payload: payload::push_payload(
                notification_json,
                page_icon_url.as_deref(),
                badge_count,
            ),
            urgency,
        });
    }
    Ok(deliveries)
}

/// A test push to the device at `endpoint`, if the owner registered it.
pub fn plan_test_push(
    ctx: &Context<'_>,
    owner: Option<Notifiable>,
    endpoint: &str,
) -> Result<PushDelivery> {
    let (subscription, _) = lookup_subscription(ctx, owner, endpoint)?
        .ok_or_else(|| Error::not_found("push registration", endpoint.trim()))?;
    let page_icon_url = page_icon_url(ctx, owner)?;
    Ok(PushDelivery {
        payload: payload::test_payload(&subscription, page_icon_url.as_deref()),
        subscription,
        urgency: Urgency::High,
    })
}

/// Record the first push of a notification.
pub fn mark_pushed(ctx: &Context<'_>, notification_id: NotificationId, now: DateTime<Utc>) -> Result<()> {
    let mut notification: Notification = ctx.store.fetch(notification_id)?;
    if notification.pushed_at.is_none() {
        notification.pushed_at = Some(now);
        ctx.store.put(&notification)?;
    }
    Ok(())
}

/// Record delivery reported by a service worker.
///
/// Repeating a report is harmless. Tokens that fail verification, and
/// tokens for notifications that no longer exist, resolve to `None`.
pub fn mark_delivered(
    ctx: &Context<'_>,
    delivery_token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Notification>> {
    let Ok(verified) = ctx.signer.verify(delivery_token, Purpose::Delivery, now) else {
        return Ok(None);
    };
    let Some(mut notification) = ctx
        .store
        .get::<Notification>(NotificationId::from(verified.id))?
    else {
        return Ok(None);
    };
    if notification.delivered() {
        return Ok(Some(notification));
    }
    if verified.expect_fingerprint(delivery_fingerprint(false)).is_err() {
        return Ok(None);
    }
    notification.delivered_at = Some(now);
    if notification.pushed_at.is_none() {
        notification.pushed_at = Some(now);
    }
    ctx.store.put(&notification)?;
    Ok(Some(notification))
}

/// Reset the recipient's badge count.
pub fn clear_notifications(ctx: &Context<'_>, owner: Notifiable, now: DateTime<Utc>) -> Result<()> {
    match owner {
        Notifiable::User(id) => {
            let mut user: User = ctx.store.fetch(id)?;
            user.notifications_last_cleared_at = Some(now);
            ctx.store.put(&user)
        }
        Notifiable::Friend(id) => {
            let mut friend: Friend = ctx.store.fetch(id)?;
            friend.notifications_last_cleared_at = Some(now);
            ctx.store.put(&friend)
        }
    }
}

/// Notifications never pushed, oldest first.
pub fn unpushed_notifications(ctx: &Context<'_>) -> Result<Vec<Notification>> {
    let mut notifications = ctx.store.filter::<Notification>(|n| n.pushed_at.is_none())?;
    notifications.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(notifications)
}

// =============================================================================
// TEXT BLASTS
// =============================================================================

/// Text blasts never sent, oldest first.
pub fn unsent_text_blasts(ctx: &Context<'_>) -> Result<Vec<TextBlast>> {
    let mut blasts = ctx.store.filter::<TextBlast>(|b| b.sent_at.is_none())?;
    blasts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(blasts)
}

/// The SMS for a text blast, or `None` once sent.
pub fn plan_text_blast(ctx: &Context<'_>, id: TextBlastId) -> Result<Option<TextMessage>> {
    let blast: TextBlast = ctx.store.fetch(id)?;
    if blast.sent_at.is_some() {
        return Ok(None);
    }
    let post: Post = ctx.store.fetch(blast.post_id)?;
    let author: User = ctx.store.fetch(post.author_id)?;
    let world = ctx.world_of(author.id)?;
    let friend: Friend = ctx.store.fetch(blast.friend_id)?;
    Ok(Some(TextMessage {
        to: blast.phone_number,
        body: post_text_message(&post, &author, &world, &friend, ctx.links),
    }))
}

pub fn mark_text_blast_sent(ctx: &Context<'_>, id: TextBlastId, now: DateTime<Utc>) -> Result<()> {
    let mut blast: TextBlast = ctx.store.fetch(id)?;
    blast.sent_at = Some(now);
    ctx.store.put(&blast)
}
