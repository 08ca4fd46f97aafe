//! Friends, invitations, join requests and encouragements.

use super::{Context, Effect, Outcome, notify};
use crate::error::{Error, Result, ValidationErrors};
use crate::ids::{ActivityId, EncouragementId, FriendId, InvitationId, JoinRequestId};
use crate::model::{
    Activity, ActivityCoupon, Encouragement, Friend, Invitation, JoinRequest, Noticeable,
    Notifiable, Post, PostType, User, World,
};
use crate::notice::installation_message;
use crate::storage::StoreExt;
use crate::validate::normalize_phone_number;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

/// Window in which a friend may send one encouragement.
pub const ENCOURAGEMENT_WINDOW_HOURS: i64 = 12;

// =============================================================================
// INVITATIONS
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvitationParams {
    pub invitee_name: String,
    #[serde(default)]
    pub invitee_emoji: Option<String>,
    #[serde(default)]
    pub offered_activity_ids: Vec<ActivityId>,
    #[serde(default)]
    pub join_request_id: Option<JoinRequestId>,
}

/// An invitation with what the invitee sees before accepting.
#[derive(Debug, Clone, PartialEq)]
pub struct InvitationDetails {
    pub invitation: Invitation,
    pub owner: User,
    pub world: World,
    pub activities: Vec<Activity>,
    /// The friend created from this invitation, once accepted.
    pub friend: Option<Friend>,
}

/// Invite someone into the user's world.
pub fn create_invitation(
    ctx: &Context<'_>,
    user: &User,
    params: &InvitationParams,
    now: DateTime<Utc>,
) -> Result<Invitation> {
    let world = ctx.world_of(user.id)?;
    let invitation = Invitation {
        id: InvitationId::new(),
        world_id: world.id,
        invitee_name: params.invitee_name.trim().to_owned(),
        invitee_emoji: params
            .invitee_emoji
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned),
        offered_activity_ids: params.offered_activity_ids.clone(),
        join_request_id: params.join_request_id,
        created_at: now,
        updated_at: now,
    };

    let mut errors = invitation.validate();
    let name = invitation.invitee_name.clone();
    if ctx
        .store
        .find::<Invitation>(|i| i.world_id == world.id && i.invitee_name == name)?
        .is_some()
    {
        errors.add("invitee_name", "already invited");
    } else if ctx
        .store
        .find::<Friend>(|f| f.user_id == user.id && f.name == name)?
        .is_some()
    {
        errors.add("invitee_name", "already registered");
    }
    for activity_id in &invitation.offered_activity_ids {
        let owned = ctx
            .store
            .get::<Activity>(*activity_id)?
            .is_some_and(|a| a.world_id == world.id);
        if !owned {
            errors.add("offered_activity_ids", "must be activities in your world");
            break;
        }
    }
    if let Some(join_request_id) = invitation.join_request_id {
        let owned = ctx
            .store
            .get::<JoinRequest>(join_request_id)?
            .is_some_and(|r| r.world_id == world.id);
        if !owned {
            errors.add("join_request", "must exist");
        }
    }
    errors.into_result()?;
    ctx.store.put(&invitation)?;
    Ok(invitation)
}

fn accepted_friend(ctx: &Context<'_>, invitation_id: InvitationId) -> Result<Option<Friend>> {
    ctx.store
        .find::<Friend>(|f| f.invitation_id == Some(invitation_id))
}

/// The user's invitations nobody has accepted yet, newest first.
pub fn pending_invitations(ctx: &Context<'_>, user: &User) -> Result<Vec<Invitation>> {
    let world = ctx.world_of(user.id)?;
    let mut invitations = Vec::new();
    for invitation in ctx.store.filter::<Invitation>(|i| i.world_id == world.id)? {
        if accepted_friend(ctx, invitation.id)?.is_none() {
            invitations.push(invitation);
        }
    }
    invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(invitations)
}

/// Delete an invitation. A friend who already accepted keeps their access.
pub fn delete_invitation(ctx: &Context<'_>, user: &User, invitation_id: InvitationId) -> Result<()> {
    let invitation: Invitation = ctx.store.fetch(invitation_id)?;
    if invitation.world_id != ctx.world_of(user.id)?.id {
        return Err(Error::Forbidden);
    }
    if let Some(mut friend) = accepted_friend(ctx, invitation.id)? {
        friend.invitation_id = None;
        ctx.store.put(&friend)?;
    }
    ctx.store.delete::<Invitation>(invitation.id)?;
    Ok(())
}

/// An invitation as shown on its public page.
pub fn show_invitation(ctx: &Context<'_>, invitation_id: InvitationId) -> Result<InvitationDetails> {
    let invitation: Invitation = ctx.store.fetch(invitation_id)?;
    let world: World = ctx.store.fetch(invitation.world_id)?;
    let owner: User = ctx.store.fetch(world.owner_id)?;
    let mut activities = Vec::new();
    for activity_id in &invitation.offered_activity_ids {
        if let Some(activity) = ctx.store.get::<Activity>(*activity_id)? {
            activities.push(activity);
        }
    }
    let friend = accepted_friend(ctx, invitation.id)?;
    Ok(InvitationDetails {
        invitation,
        owner,
        world,
        activities,
        friend,
    })
}

/// Accept an invitation.
///
/// Creates the friend (or updates the one that already accepted), issues
/// coupons for the offered activities, tells the world owner and texts the
/// friend their installation link.
pub fn accept_invitation(
    ctx: &Context<'_>,
    invitation_id: InvitationId,
    phone_number: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Outcome<Friend>> {
    let invitation: Invitation = ctx.store.fetch(invitation_id)?;
    let world: World = ctx.store.fetch(invitation.world_id)?;
    let owner: User = ctx.store.fetch(world.owner_id)?;

    let existing = accepted_friend(ctx, invitation.id)?;
    let created = existing.is_none();
    let mut friend = existing.unwrap_or_else(|| {
        let mut friend = Friend::new(
            owner.id,
            &invitation.invitee_name,
            invitation.invitee_emoji.as_deref(),
            now,
        );
        friend.invitation_id = Some(invitation.id);
        friend
    });

    let join_request_phone = match invitation.join_request_id {
        Some(id) => ctx.store.get::<JoinRequest>(id)?.map(|r| r.phone_number),
        None => None,
    };
    let mut errors = ValidationErrors::new();
    let raw_phone = phone_number
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .or(join_request_phone);
    if let Some(raw) = raw_phone {
        match normalize_phone_number(&raw) {
            Some(normalized) => friend.phone_number = Some(normalized),
            None => errors.add("phone_number", "is invalid"),
        }
    }
    friend.updated_at = now;
    errors.merge(friend.validate());
    errors.merge(uniqueness_errors(ctx, &friend)?);
    errors.into_result()?;
    ctx.store.put(&friend)?;

    let mut effects = Vec::new();
    if created {
        for activity_id in &invitation.offered_activity_ids {
            if ctx.store.get::<Activity>(*activity_id)?.is_some() {
                ctx.store.put(&ActivityCoupon::issue(friend.id, *activity_id, now))?;
            }
        }
        notify(
            ctx,
            Noticeable::Friend(friend.id),
            Some(Notifiable::User(owner.id)),
            StdDuration::ZERO,
            now,
            &mut effects,
        )?;
    }
    if let Some(phone_number) = &friend.phone_number {
        effects.push(Effect::SendSms {
            to: phone_number.clone(),
            body: installation_message(&friend, &owner, &world, ctx.links),
        });
    }
    Ok(Outcome::new(friend, effects))
}

fn uniqueness_errors(ctx: &Context<'_>, friend: &Friend) -> Result<ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let others = ctx
        .store
        .filter::<Friend>(|f| f.user_id == friend.user_id && f.id != friend.id)?;
    if others.iter().any(|f| f.name == friend.name) {
        errors.add("name", "has already been taken");
    }
    if friend.phone_number.is_some()
        && others.iter().any(|f| f.phone_number == friend.phone_number)
    {
        errors.add("phone_number", "has already been taken");
    }
    Ok(errors)
}

// =============================================================================
// JOIN REQUESTS
// =============================================================================

/// Ask to join a world. Asking again with the same number updates the
/// request; the owner is notified once.
pub fn create_join_request(
    ctx: &Context<'_>,
    handle: &str,
    name: &str,
    phone_number: &str,
    now: DateTime<Utc>,
) -> Result<Outcome<JoinRequest>> {
    let world = ctx.world_by_handle(handle)?;
    let mut request = JoinRequest::new(world.id, name, phone_number, now);
    request.validate().into_result()?;

    let phone = request.phone_number.clone();
    let existing = ctx
        .store
        .find::<JoinRequest>(|r| r.world_id == world.id && r.phone_number == phone)?;
    let already_friend = ctx
        .store
        .find::<Friend>(|f| f.user_id == world.owner_id && f.phone_number.as_deref() == Some(&phone))?
        .is_some();
    let already_invited = match &existing {
        Some(existing) => {
            let existing_id = existing.id;
            let invitation = ctx
                .store
                .find::<Invitation>(|i| i.join_request_id == Some(existing_id))?;
            match invitation {
                Some(invitation) => accepted_friend(ctx, invitation.id)?.is_some(),
                None => false,
            }
        }
        None => false,
    };
    if already_friend || already_invited {
        let mut errors = ValidationErrors::new();
        errors.add("base", "you have already been invited");
        return Err(errors.into());
    }

    let mut effects = Vec::new();
    match existing {
        Some(existing) => {
            let name = request.name;
            request = existing;
            request.name = name;
            ctx.store.put(&request)?;
        }
        None => {
            ctx.store.put(&request)?;
            notify(
                ctx,
                Noticeable::JoinRequest(request.id),
                Some(Notifiable::User(world.owner_id)),
                StdDuration::ZERO,
                now,
                &mut effects,
            )?;
        }
    }
    Ok(Outcome::new(request, effects))
}

/// Join requests without an invitation, newest first.
pub fn pending_join_requests(ctx: &Context<'_>, user: &User) -> Result<Vec<JoinRequest>> {
    let world = ctx.world_of(user.id)?;
    let invited: Vec<JoinRequestId> = ctx
        .store
        .filter::<Invitation>(|i| i.world_id == world.id)?
        .into_iter()
        .filter_map(|i| i.join_request_id)
        .collect();
    let mut requests = ctx
        .store
        .filter::<JoinRequest>(|r| r.world_id == world.id && !invited.contains(&r.id))?;
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(requests)
}

/// Turn a join request into an invitation under the requester's name.
pub fn invite_join_request(
    ctx: &Context<'_>,
    user: &User,
    join_request_id: JoinRequestId,
    invitee_emoji: Option<&str>,
    offered_activity_ids: &[ActivityId],
    now: DateTime<Utc>,
) -> Result<Invitation> {
    let request: JoinRequest = ctx.store.fetch(join_request_id)?;
    if request.world_id != ctx.world_of(user.id)?.id {
        return Err(Error::Forbidden);
    }
    create_invitation(
        ctx,
        user,
        &InvitationParams {
            invitee_name: request.name,
            invitee_emoji: invitee_emoji.map(str::to_owned),
            offered_activity_ids: offered_activity_ids.to_vec(),
            join_request_id: Some(request.id),
        },
        now,
    )
}

pub fn delete_join_request(ctx: &Context<'_>, user: &User, join_request_id: JoinRequestId) -> Result<()> {
    let request: JoinRequest = ctx.store.fetch(join_request_id)?;
    if request.world_id != ctx.world_of(user.id)?.id {
        return Err(Error::Forbidden);
    }
    for mut invitation in ctx
        .store
        .filter::<Invitation>(|i| i.join_request_id == Some(request.id))?
    {
        invitation.join_request_id = None;
        ctx.store.put(&invitation)?;
    }
    ctx.store.delete::<JoinRequest>(request.id)?;
    Ok(())
}

// =============================================================================
// FRIENDS
// =============================================================================

/// A friend as listed for the world owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendSummary {
    #[serde(flatten)]
    pub friend: Friend,
    pub notifiable: bool,
    pub text_only: bool,
    pub active_activity_coupon_count: usize,
}

/// The user's friends, newest first.
pub fn friends(ctx: &Context<'_>, user: &User, now: DateTime<Utc>) -> Result<Vec<FriendSummary>> {
    let mut friends = ctx.store.filter::<Friend>(|f| f.user_id == user.id)?;
    friends.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    friends
        .into_iter()
        .map(|friend| {
            let notifiable = ctx.notifiable(Notifiable::Friend(friend.id))?;
            let friend_id = friend.id;
            let coupons = ctx
                .store
                .filter::<ActivityCoupon>(|c| c.friend_id == friend_id && c.active(now))?;
            Ok(FriendSummary {
                text_only: !notifiable && friend.phone_number.is_some(),
                notifiable,
                active_activity_coupon_count: coupons.len(),
                friend,
            })
        })
        .collect()
}

/// A friend of the user.
pub fn friend_of(ctx: &Context<'_>, user: &User, friend_id: FriendId) -> Result<Friend> {
    let friend: Friend = ctx.store.fetch(friend_id)?;
    if friend.user_id != user.id {
        return Err(Error::Forbidden);
    }
    Ok(friend)
}

/// Owner-editable friend fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FriendUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub chosen_family: Option<bool>,
    #[serde(default)]
    pub paused: Option<bool>,
}

pub fn update_friend(
    ctx: &Context<'_>,
    user: &User,
    friend_id: FriendId,
    params: &FriendUpdate,
    now: DateTime<Utc>,
) -> Result<Friend> {
    let mut friend = friend_of(ctx, user, friend_id)?;
    let mut errors = ValidationErrors::new();
    if let Some(name) = &params.name {
        friend.name = name.trim().to_owned();
    }
    if let Some(emoji) = &params.emoji {
        let emoji = emoji.trim();
        friend.emoji = (!emoji.is_empty()).then(|| emoji.to_owned());
    }
    if let Some(phone) = &params.phone_number {
        let phone = phone.trim();
        if phone.is_empty() {
            friend.phone_number = None;
        } else {
            match normalize_phone_number(phone) {
                Some(normalized) => friend.phone_number = Some(normalized),
                None => errors.add("phone_number", "is invalid"),
            }
        }
    }
    if let Some(chosen_family) = params.chosen_family {
        friend.chosen_family = chosen_family;
    }
    match params.paused {
        Some(true) if friend.paused_since.is_none() => friend.paused_since = Some(now),
        Some(false) => friend.paused_since = None,
        _ => {}
    }
    friend.updated_at = now;
    errors.merge(friend.validate());
    errors.merge(uniqueness_errors(ctx, &friend)?);
    errors.into_result()?;
    ctx.store.put(&friend)?;
    Ok(friend)
}

/// Which post types a friend is notified about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub subscribed_post_types: Vec<PostType>,
}

#[must_use]
pub fn notification_settings(friend: &Friend) -> NotificationSettings {
    NotificationSettings {
        subscribed_post_types: friend.subscribed_post_types.clone(),
    }
}

pub fn update_notification_settings(
    ctx: &Context<'_>,
    friend: &Friend,
    settings: &NotificationSettings,
    now: DateTime<Utc>,
) -> Result<Friend> {
    let mut friend = friend.clone();
    let mut types = settings.subscribed_post_types.clone();
    types.sort();
    types.dedup();
    friend.subscribed_post_types = types;
    friend.updated_at = now;
    ctx.store.put(&friend)?;
    Ok(friend)
}

// =============================================================================
// ENCOURAGEMENTS
// =============================================================================

/// Nudge the world owner to post. One per friend every 12 hours.
pub fn create_encouragement(
    ctx: &Context<'_>,
    friend: &Friend,
    emoji: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<Outcome<Encouragement>> {
    let encouragement = Encouragement {
        id: EncouragementId::new(),
        friend_id: friend.id,
        emoji: emoji.trim().to_owned(),
        message: message.trim().to_owned(),
        created_at: now,
    };
    let mut errors = encouragement.validate();
    let window_start = now - Duration::hours(ENCOURAGEMENT_WINDOW_HOURS);
    if ctx
        .store
        .find::<Encouragement>(|e| e.friend_id == friend.id && e.created_at > window_start)?
        .is_some()
    {
        errors.add("base", "already created for this friend in the last 12 hours");
    }
    errors.into_result()?;
    ctx.store.put(&encouragement)?;

    let mut effects = Vec::new();
    notify(
        ctx,
        Noticeable::Encouragement(encouragement.id),
        Some(Notifiable::User(friend.user_id)),
        StdDuration::ZERO,
        now,
        &mut effects,
    )?;
    Ok(Outcome::new(encouragement, effects))
}

fn latest_post_at(ctx: &Context<'_>, user_id: crate::ids::UserId, types: &[PostType]) -> Result<Option<DateTime<Utc>>> {
    Ok(ctx
        .store
        .filter::<Post>(|p| p.author_id == user_id && (types.is_empty() || types.contains(&p.post_type)))?
        .into_iter()
        .map(|p| p.created_at)
        .max())
}

/// Encouragements received since the user's last poem or journal entry,
/// oldest first.
pub fn encouragements_since_last_poem_or_journal_entry(
    ctx: &Context<'_>,
    user: &User,
) -> Result<Vec<Encouragement>> {
    let since = latest_post_at(ctx, user.id, &[PostType::Poem, PostType::JournalEntry])?;
    let friend_ids: Vec<FriendId> = ctx
        .store
        .filter::<Friend>(|f| f.user_id == user.id)?
        .into_iter()
        .map(|f| f.id)
        .collect();
    let mut encouragements = ctx.store.filter::<Encouragement>(|e| {
        friend_ids.contains(&e.friend_id) && since.is_none_or(|since| e.created_at > since)
    })?;
    encouragements.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(encouragements)
}

/// The friend's own encouragement from the last 12 hours, unless the owner
/// has posted since.
pub fn latest_visible_encouragement(
    ctx: &Context<'_>,
    friend: &Friend,
    now: DateTime<Utc>,
) -> Result<Option<Encouragement>> {
    let window_start = now - Duration::hours(ENCOURAGEMENT_WINDOW_HOURS);
    let last_post_at = latest_post_at(ctx, friend.user_id, &[])?;
    Ok(ctx
        .store
        .filter::<Encouragement>(|e| {
            e.friend_id == friend.id
                && e.created_at > window_start
                && last_post_at.is_none_or(|at| e.created_at > at)
        })?
        .into_iter()
        .max_by_key(|e| e.created_at))
}
