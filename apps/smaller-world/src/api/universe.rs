use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use smaller_world_core::service::feed;
use std::sync::Arc;

use super::{ApiResult, CurrentUser, Requester, page_json, parse_cursor};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Own posts, posts from worlds the user's devices follow, and public posts.
pub async fn local_posts(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<Value>> {
    let cursor = parse_cursor(query.cursor.as_deref())?;
    let page = feed::local_universe(&state.ctx(), &user, cursor, query.limit)?;
    Ok(Json(page_json("posts", &page)))
}

pub async fn worlds(State(state): State<Arc<AppState>>, requester: Requester) -> ApiResult<Json<Value>> {
    let user = match &requester {
        Requester::User { user, .. } => Some(user),
        _ => None,
    };
    let worlds = feed::universe_worlds(&state.ctx(), user)?;
    Ok(Json(json!(worlds)))
}
