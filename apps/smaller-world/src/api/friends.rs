//! Friends, invitations, join requests, encouragements and activity coupons.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use smaller_world_core::ids::{ActivityId, FriendId, InvitationId, JoinRequestId};
use smaller_world_core::service::coupons::{self, ActivityParams};
use smaller_world_core::service::friends::{
    self, FriendUpdate, InvitationDetails, InvitationParams, NotificationSettings,
};
use std::sync::Arc;

use super::{ApiResult, CurrentFriend, CurrentUser};
use crate::state::AppState;

// =============================================================================
// WORLD OWNER
// =============================================================================

pub async fn index(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let friends = friends::friends(&state.ctx(), &user, Utc::now())?;
    Ok(Json(json!({ "friends": friends })))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<FriendId>,
) -> ApiResult<Json<Value>> {
    let friend = friends::friend_of(&state.ctx(), &user, id)?;
    Ok(Json(json!({ "friend": friend })))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<FriendId>,
    Json(params): Json<FriendUpdate>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let friend = friends::update_friend(&state.ctx(), &user, id, &params, Utc::now())?;
    Ok(Json(json!({ "friend": friend })))
}

pub async fn invitations(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let invitations = friends::pending_invitations(&state.ctx(), &user)?;
    Ok(Json(json!({ "invitations": invitations })))
}

pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(params): Json<InvitationParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _guard = state.services.write_lock.lock().await;
    let ctx = state.ctx();
    let invitation = friends::create_invitation(&ctx, &user, &params, Utc::now())?;
    tracing::info!(invitation = %invitation.id, "created invitation");
    let url = ctx.links.invitation_url(invitation.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "invitation": invitation, "url": url })),
    ))
}

pub async fn delete_invitation(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<InvitationId>,
) -> ApiResult<StatusCode> {
    let _guard = state.services.write_lock.lock().await;
    friends::delete_invitation(&state.ctx(), &user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_requests(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let requests = friends::pending_join_requests(&state.ctx(), &user)?;
    Ok(Json(json!({ "join_requests": requests })))
}

pub async fn delete_join_request(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<JoinRequestId>,
) -> ApiResult<StatusCode> {
    let _guard = state.services.write_lock.lock().await;
    friends::delete_join_request(&state.ctx(), &user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct InviteJoinRequestParams {
    #[serde(default)]
    pub invitee_emoji: Option<String>,
    #[serde(default)]
    pub offered_activity_ids: Vec<ActivityId>,
}

pub async fn invite_join_request(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<JoinRequestId>,
    Json(params): Json<InviteJoinRequestParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _guard = state.services.write_lock.lock().await;
    let ctx = state.ctx();
    let invitation = friends::invite_join_request(
        &ctx,
        &user,
        id,
        params.invitee_emoji.as_deref(),
        &params.offered_activity_ids,
        Utc::now(),
    )?;
    let url = ctx.links.invitation_url(invitation.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "invitation": invitation, "url": url })),
    ))
}

pub async fn encouragements(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let encouragements = friends::encouragements_since_last_poem_or_journal_entry(&state.ctx(), &user)?;
    Ok(Json(json!({ "encouragements": encouragements })))
}

pub async fn activities(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let activities = coupons::activities(&state.ctx(), &user)?;
    Ok(Json(json!({ "activities": activities })))
}

pub async fn create_activity(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(params): Json<ActivityParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _guard = state.services.write_lock.lock().await;
    let activity = coupons::create_activity(&state.ctx(), &user, &params, Utc::now())?;
    Ok((StatusCode::CREATED, Json(json!({ "activity": activity }))))
}

#[derive(Debug, Deserialize)]
pub struct CouponParams {
    pub friend_id: FriendId,
    pub activity_id: ActivityId,
}

pub async fn issue_coupon(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(params): Json<CouponParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        coupons::issue_coupon(
            &state.ctx(),
            &user,
            params.friend_id,
            params.activity_id,
            Utc::now(),
        )?
    };
    state.jobs.dispatch(outcome.effects);
    Ok((StatusCode::CREATED, Json(json!({ "activity_coupon": outcome.value }))))
}

// =============================================================================
// INVITEES AND FRIENDS
// =============================================================================

fn invitation_json(details: &InvitationDetails) -> Value {
    json!({
        "invitation": details.invitation,
        "world": {
            "handle": details.world.handle,
            "name": details.world.name(&details.owner),
            "icon_url": details.world.icon_url,
        },
        "owner": { "name": details.owner.name },
        "offered_activities": details.activities,
        "accepted": details.friend.is_some(),
    })
}

pub async fn show_invitation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvitationId>,
) -> ApiResult<Json<Value>> {
    let details = friends::show_invitation(&state.ctx(), id)?;
    Ok(Json(invitation_json(&details)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AcceptParams {
    #[serde(default)]
    pub phone_number: Option<String>,
}

pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<InvitationId>,
    Json(params): Json<AcceptParams>,
) -> ApiResult<Json<Value>> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        friends::accept_invitation(&state.ctx(), id, params.phone_number.as_deref(), Utc::now())?
    };
    let friend = outcome.value;
    tracing::info!(invitation = %id, friend = %friend.id, "accepted invitation");
    state.jobs.dispatch(outcome.effects);
    let ctx = state.ctx();
    let world = ctx.world_of(friend.user_id)?;
    let url = ctx
        .links
        .user_url(&world.handle, &[("friend_token", friend.access_token.clone())]);
    Ok(Json(json!({
        "friend": friend,
        "access_token": friend.access_token,
        "world_url": url,
    })))
}

#[derive(Debug, Deserialize)]
pub struct JoinRequestParams {
    pub name: String,
    pub phone_number: String,
}

pub async fn create_join_request(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Json(params): Json<JoinRequestParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        friends::create_join_request(
            &state.ctx(),
            &handle,
            &params.name,
            &params.phone_number,
            Utc::now(),
        )?
    };
    state.jobs.dispatch(outcome.effects);
    Ok((StatusCode::CREATED, Json(json!({ "join_request": { "id": outcome.value.id } }))))
}

pub async fn notification_settings(CurrentFriend(friend): CurrentFriend) -> Json<NotificationSettings> {
    Json(friends::notification_settings(&friend))
}

pub async fn update_notification_settings(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Json(settings): Json<NotificationSettings>,
) -> ApiResult<Json<NotificationSettings>> {
    let _guard = state.services.write_lock.lock().await;
    let friend = friends::update_notification_settings(&state.ctx(), &friend, &settings, Utc::now())?;
    Ok(Json(friends::notification_settings(&friend)))
}

#[derive(Debug, Deserialize)]
pub struct EncouragementParams {
    pub emoji: String,
    pub message: String,
}

pub async fn create_encouragement(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Json(params): Json<EncouragementParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        friends::create_encouragement(&state.ctx(), &friend, &params.emoji, &params.message, Utc::now())?
    };
    state.jobs.dispatch(outcome.effects);
    Ok((StatusCode::CREATED, Json(json!({ "encouragement": outcome.value }))))
}

pub async fn latest_encouragement(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
) -> ApiResult<Json<Value>> {
    let encouragement = friends::latest_visible_encouragement(&state.ctx(), &friend, Utc::now())?;
    Ok(Json(json!({ "encouragement": encouragement })))
}

pub async fn active_coupons(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
) -> ApiResult<Json<Value>> {
    let coupons: Vec<Value> = coupons::active_coupons(&state.ctx(), &friend, Utc::now())?
        .into_iter()
        .map(|(coupon, activity)| json!({ "coupon": coupon, "activity": activity }))
        .collect();
    Ok(Json(json!({ "activity_coupons": coupons })))
}
