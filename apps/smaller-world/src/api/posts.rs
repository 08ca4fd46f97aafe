//! Post endpoints: the owner's world, public user pages and friend actions.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use smaller_world_core::PostType;
use smaller_world_core::ids::{PostId, PostStickerId};
use smaller_world_core::model::{Position, User};
use smaller_world_core::service::posts::{self, NewPost, NewSticker, PostFilter, PostUpdate};
use smaller_world_core::service::streak;
use smaller_world_core::{StoreExt, Viewer};
use std::sync::Arc;

use super::{ApiResult, CurrentFriend, CurrentUser, Requester, page_json, parse_cursor};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PostQuery {
    #[serde(rename = "type", default)]
    pub post_type: Option<PostType>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PostQuery {
    fn filter(&self) -> ApiResult<PostFilter> {
        Ok(PostFilter {
            post_type: self.post_type,
            date: self.date,
            query: self.q.clone().filter(|q| !q.trim().is_empty()),
            cursor: parse_cursor(self.cursor.as_deref())?,
            limit: self.limit,
        })
    }
}

// =============================================================================
// OWNER
// =============================================================================

pub async fn index(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PostQuery>,
) -> ApiResult<Json<Value>> {
    let page = posts::list_posts(&state.ctx(), Viewer::User(&user), &user, &query.filter()?)?;
    Ok(Json(page_json("posts", &page)))
}

pub async fn pinned(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let pinned = posts::pinned_posts(&state.ctx(), Viewer::User(&user), &user, Utc::now())?;
    Ok(Json(json!({ "posts": pinned })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(params): Json<NewPost>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        posts::create_post(&state.ctx(), &user, &params, Utc::now())?
    };
    tracing::info!(post = %outcome.value.id, effects = outcome.effects.len(), "created post");
    state.jobs.dispatch(outcome.effects);
    Ok((StatusCode::CREATED, Json(json!({ "post": outcome.value }))))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
    Json(params): Json<PostUpdate>,
) -> ApiResult<Json<Value>> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        posts::update_post(&state.ctx(), &user, id, &params, Utc::now())?
    };
    state.jobs.dispatch(outcome.effects);
    Ok(Json(json!({ "post": outcome.value })))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<StatusCode> {
    let _guard = state.services.write_lock.lock().await;
    posts::delete_post(&state.ctx(), &user, id)?;
    tracing::info!(post = %id, "deleted post");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let stats = posts::post_stats(&state.ctx(), &user, id)?;
    Ok(Json(json!({ "stats": stats })))
}

pub async fn audience(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let audience = posts::audience(&state.ctx(), &user, id)?;
    Ok(Json(json!({ "audience": audience })))
}

pub async fn viewers(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let viewers = posts::viewers(&state.ctx(), &user, id)?;
    Ok(Json(json!({ "viewers": viewers })))
}

pub async fn share(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let share = posts::share_post(&state.ctx(), Viewer::User(&user), id, Utc::now())?;
    Ok(Json(json!({ "share": share })))
}

pub async fn streak(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Value>> {
    let streak = streak::post_streak(&state.ctx(), &user, Utc::now())?;
    Ok(Json(json!({ "streak": streak })))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub start_date: NaiveDate,
}

pub async fn timeline(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<Json<Value>> {
    let days = streak::timeline(
        &state.ctx(),
        Viewer::User(&user),
        &user,
        query.start_date,
        user.time_zone(),
        Utc::now(),
    )?;
    Ok(Json(json!({ "timeline": days })))
}

// =============================================================================
// PUBLIC / FRIENDS
// =============================================================================

/// A world's posts as the requester may see them.
pub async fn user_posts(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(handle): Path<String>,
    Query(query): Query<PostQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = state.ctx();
    let world = ctx.world_by_handle(&handle)?;
    let author: User = ctx.store.fetch(world.owner_id)?;
    let viewer = requester.viewer();
    let page = posts::list_posts(&ctx, viewer, &author, &query.filter()?)?;
    let mut body = page_json("posts", &page);
    if query.cursor.is_none() {
        body["pinned_posts"] = json!(posts::pinned_posts(&ctx, viewer, &author, Utc::now())?);
    }
    body["world"] = json!({ "handle": world.handle, "name": world.name(&author) });
    Ok(Json(body))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let post = posts::show_post(&state.ctx(), requester.viewer(), requester.admin(), id)?;
    Ok(Json(json!({ "post": post })))
}

pub async fn mark_seen(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let first = posts::mark_seen(&state.ctx(), &friend, id, Utc::now())?;
    Ok(Json(json!({ "seen": true, "first": first })))
}

pub async fn mark_replied(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let first = posts::mark_replied(&state.ctx(), &friend, id, Utc::now())?;
    Ok(Json(json!({ "replied": true, "first": first })))
}

pub async fn reactions(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let ctx = state.ctx();
    // Visible to whoever can see the post.
    posts::show_post(&ctx, requester.viewer(), requester.admin(), id)?;
    Ok(Json(json!({ "reactions": posts::reactions(&ctx, id)? })))
}

#[derive(Debug, Deserialize)]
pub struct ReactionParams {
    pub emoji: String,
}

pub async fn react(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostId>,
    Json(params): Json<ReactionParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _guard = state.services.write_lock.lock().await;
    let reaction = posts::react(&state.ctx(), &friend, id, &params.emoji, Utc::now())?;
    Ok((StatusCode::CREATED, Json(json!({ "reaction": reaction }))))
}

pub async fn stickers(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let ctx = state.ctx();
    posts::show_post(&ctx, requester.viewer(), requester.admin(), id)?;
    Ok(Json(json!({ "stickers": posts::stickers(&ctx, id)? })))
}

#[derive(Debug, Deserialize)]
pub struct StickerParams<T> {
    pub sticker: T,
}

pub async fn add_sticker(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostId>,
    Json(params): Json<StickerParams<NewSticker>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let _guard = state.services.write_lock.lock().await;
    let sticker = posts::add_sticker(&state.ctx(), &friend, id, &params.sticker, Utc::now())?;
    Ok((StatusCode::CREATED, Json(json!({ "sticker": sticker }))))
}

#[derive(Debug, Deserialize)]
pub struct StickerMove {
    pub relative_position: Position,
}

pub async fn move_sticker(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostStickerId>,
    Json(params): Json<StickerParams<StickerMove>>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let sticker = posts::move_sticker(&state.ctx(), &friend, id, params.sticker.relative_position)?;
    Ok(Json(json!({ "sticker": sticker })))
}

pub async fn remove_sticker(
    State(state): State<Arc<AppState>>,
    CurrentFriend(friend): CurrentFriend,
    Path(id): Path<PostStickerId>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let post_id = posts::remove_sticker(&state.ctx(), &friend, id)?;
    Ok(Json(json!({ "postId": post_id })))
}

pub async fn share_as_viewer(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Path(id): Path<PostId>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let share = posts::share_post(&state.ctx(), requester.viewer(), id, Utc::now())?;
    Ok(Json(json!({ "share": share })))
}
