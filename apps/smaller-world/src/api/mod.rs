//! # HTTP API
//!
//! JSON endpoints over axum.
//!
//! Authentication:
//! - users: signed `session_id` cookie, or a Supabase session cookie
//! - friends: `friend_token` query parameter
//!
//! Mutating handlers hold the services write lock for the whole operation
//! and hand the resulting effects to the job queue.

mod auth;
mod friends;
mod posts;
mod push;
mod universe;

use axum::extract::{ConnectInfo, FromRequestParts, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use smaller_world_core::model::{Friend, Notifiable, User};
use smaller_world_core::service::auth::{resume_session, user_by_id};
use smaller_world_core::{Cursor, Page, Viewer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::supabase::{self, SupabaseError};

pub type ApiResult<T> = Result<T, ApiError>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session_id";

const COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

const SERVICE_WORKER: &str = include_str!("../../assets/sw.js");

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sw.js", get(service_worker))
        // Auth
        .route("/login_requests", post(auth::create_login_request))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/registrations", post(auth::register))
        // World (signed-in user)
        .route("/world/posts", get(posts::index).post(posts::create))
        .route("/world/posts/pinned", get(posts::pinned))
        .route("/world/posts/{id}", put(posts::update).delete(posts::destroy))
        .route("/world/posts/{id}/stats", get(posts::stats))
        .route("/world/posts/{id}/audience", get(posts::audience))
        .route("/world/posts/{id}/viewers", get(posts::viewers))
        .route("/world/posts/{id}/share", post(posts::share))
        .route("/world/universe/posts", get(universe::local_posts))
        .route("/world/streak", get(posts::streak))
        .route("/world/timeline", get(posts::timeline))
        .route("/world/friends", get(friends::index))
        .route("/world/friends/{id}", get(friends::show).put(friends::update))
        .route("/world/invitations", get(friends::invitations).post(friends::create_invitation))
        .route("/world/invitations/{id}", delete(friends::delete_invitation))
        .route("/world/join_requests", get(friends::join_requests))
        .route("/world/join_requests/{id}", delete(friends::delete_join_request))
        .route("/world/join_requests/{id}/invite", post(friends::invite_join_request))
        .route("/world/encouragements", get(friends::encouragements))
        .route("/world/activities", get(friends::activities).post(friends::create_activity))
        .route("/world/activity_coupons", post(friends::issue_coupon))
        // Public and friend-facing
        .route("/users/{handle}/posts", get(posts::user_posts))
        .route("/posts/{id}", get(posts::show))
        .route("/posts/{id}/mark_seen", post(posts::mark_seen))
        .route("/posts/{id}/mark_replied", post(posts::mark_replied))
        .route("/posts/{id}/reactions", get(posts::reactions).post(posts::react))
        .route("/posts/{id}/share", post(posts::share_as_viewer))
        .route("/posts/{id}/stickers", get(posts::stickers).post(posts::add_sticker))
        .route("/post_stickers/{id}", put(posts::move_sticker).delete(posts::remove_sticker))
        .route("/universe/worlds", get(universe::worlds))
        .route("/invitations/{id}", get(friends::show_invitation))
        .route("/invitations/{id}/accept", post(friends::accept_invitation))
        .route("/worlds/{handle}/join_requests", post(friends::create_join_request))
        .route(
            "/friends/notification_settings",
            get(friends::notification_settings).put(friends::update_notification_settings),
        )
        .route("/friends/encouragements", post(friends::create_encouragement))
        .route("/friends/encouragements/latest", get(friends::latest_encouragement))
        .route("/friends/activity_coupons", get(friends::active_coupons))
        // Notifications and push
        .route("/notifications/mark_delivered", post(push::mark_delivered))
        .route("/notifications/clear", post(push::clear))
        .route("/push_subscriptions", post(push::subscribe))
        .route("/push_subscriptions/lookup", post(push::lookup))
        .route("/push_subscriptions/unsubscribe", put(push::unsubscribe))
        .route("/push_subscriptions/change", post(push::change))
        .route("/push_subscriptions/test", post(push::test))
        .route("/push_subscriptions/public_key", get(push::public_key))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            refresh_supabase_session,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn service_worker() -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (CACHE_CONTROL, "no-store, must-revalidate, max-age=0"),
        ],
        SERVICE_WORKER,
    )
}

// =============================================================================
// COOKIES
// =============================================================================

/// A cookie from the request's `Cookie` headers.
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}

/// `Set-Cookie` value. An empty value expires the cookie.
pub fn set_cookie(name: &str, value: &str, secure: bool) -> Option<HeaderValue> {
    let max_age = if value.is_empty() { 0 } else { COOKIE_MAX_AGE_SECS };
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}"
    ))
    .ok()
}

fn replace_request_cookie(headers: &mut HeaderMap, name: &str, value: &str) {
    let mut pairs: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty() && pair.split_once('=').is_none_or(|(key, _)| key != name))
        .map(str::to_owned)
        .collect();
    pairs.push(format!("{name}={value}"));
    if let Ok(header) = HeaderValue::from_str(&pairs.join("; ")) {
        headers.remove(COOKIE);
        headers.insert(COOKIE, header);
    }
}

/// Exchange an expired Supabase access token before the handler runs, and
/// send the new session back as a cookie.
async fn refresh_supabase_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth) = &state.supabase else {
        return next.run(request).await;
    };
    let Some(session) =
        cookie(request.headers(), supabase::SESSION_COOKIE).and_then(|c| supabase::decode_cookie(&c))
    else {
        return next.run(request).await;
    };
    if !matches!(auth.verify(&session.access_token), Err(SupabaseError::Expired)) {
        return next.run(request).await;
    }
    match auth.refresh(&session.refresh_token).await {
        Ok(fresh) => {
            let value = supabase::encode_cookie(&fresh);
            replace_request_cookie(request.headers_mut(), supabase::SESSION_COOKIE, &value);
            let mut response = next.run(request).await;
            if let Some(header) = set_cookie(supabase::SESSION_COOKIE, &value, state.secure_cookies) {
                response.headers_mut().append(SET_COOKIE, header);
            }
            response
        }
        Err(error) => {
            tracing::warn!(%error, "failed to refresh supabase session");
            next.run(request).await
        }
    }
}

// =============================================================================
// EXTRACTORS
// =============================================================================

async fn resolve_user(parts: &Parts, state: &AppState) -> ApiResult<Option<User>> {
    let ctx = state.ctx();
    if let Some(token) = cookie(&parts.headers, SESSION_COOKIE)
        && let Some((_, user)) = resume_session(&ctx, &token, Utc::now())?
    {
        return Ok(Some(user));
    }
    let Some(auth) = &state.supabase else {
        return Ok(None);
    };
    let Some(session) =
        cookie(&parts.headers, supabase::SESSION_COOKIE).and_then(|c| supabase::decode_cookie(&c))
    else {
        return Ok(None);
    };
    match auth.verify(&session.access_token) {
        Ok(claims) if claims.authenticated() => match claims.sub.parse() {
            Ok(id) => Ok(user_by_id(&ctx, id)?),
            Err(_) => Ok(None),
        },
        Ok(_) => Ok(None),
        Err(error) => {
            tracing::debug!(%error, "ignoring supabase session");
            Ok(None)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FriendTokenParam {
    #[serde(default)]
    friend_token: Option<String>,
}

fn resolve_friend(parts: &Parts, state: &AppState) -> ApiResult<Option<Friend>> {
    let token = Query::<FriendTokenParam>::try_from_uri(&parts.uri)
        .map(|Query(param)| param)
        .unwrap_or_default()
        .friend_token;
    match token {
        Some(token) if !token.is_empty() => Ok(state.ctx().friend_by_token(&token)?),
        _ => Ok(None),
    }
}

/// The signed-in user. 401 otherwise.
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> ApiResult<Self> {
        resolve_user(parts, state)
            .await?
            .map(Self)
            .ok_or(ApiError::NotAuthenticated)
    }
}

/// The friend identified by `friend_token`. 401 otherwise.
pub struct CurrentFriend(pub Friend);

impl FromRequestParts<Arc<AppState>> for CurrentFriend {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> ApiResult<Self> {
        resolve_friend(parts, state)?
            .map(Self)
            .ok_or(ApiError::MissingFriendToken)
    }
}

/// Whoever is asking: a friend (by token), a user (by session) or nobody.
pub enum Requester {
    Friend(Friend),
    User { user: User, admin: bool },
    Anonymous,
}

impl Requester {
    pub fn viewer(&self) -> Viewer<'_> {
        match self {
            Self::Friend(friend) => Viewer::Friend(friend),
            Self::User { user, .. } => Viewer::User(user),
            Self::Anonymous => Viewer::Anonymous,
        }
    }

    pub fn admin(&self) -> bool {
        matches!(self, Self::User { admin: true, .. })
    }

    pub fn notifiable(&self) -> Option<Notifiable> {
        match self {
            Self::Friend(friend) => Some(Notifiable::Friend(friend.id)),
            Self::User { user, .. } => Some(Notifiable::User(user.id)),
            Self::Anonymous => None,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> ApiResult<Self> {
        if let Some(friend) = resolve_friend(parts, state)? {
            return Ok(Self::Friend(friend));
        }
        Ok(match resolve_user(parts, state).await? {
            Some(user) => Self::User {
                admin: state.ctx().is_admin(&user),
                user,
            },
            None => Self::Anonymous,
        })
    }
}

/// Client address and user agent, for sessions and rate limiting.
///
/// The address is the peer address unless the server sits behind a proxy
/// (`server.trust_forwarded_for`), in which case the first
/// `X-Forwarded-For` entry wins.
pub struct ClientInfo {
    pub ip: IpAddr,
    pub user_agent: String,
}

impl FromRequestParts<Arc<AppState>> for ClientInfo {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> ApiResult<Self> {
        let forwarded = if state.trust_forwarded_for {
            parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
        } else {
            None
        };
        let connected = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("unknown")
            .to_owned();
        Ok(Self {
            ip: forwarded
                .or(connected)
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            user_agent,
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Parse an optional `cursor` query value.
pub fn parse_cursor(raw: Option<&str>) -> ApiResult<Option<Cursor>> {
    raw.filter(|s| !s.is_empty())
        .map(str::parse::<Cursor>)
        .transpose()
        .map_err(ApiError::from)
}

/// `{"<key>": [...], "next_cursor": "..."}`.
pub fn page_json<T: serde::Serialize>(key: &str, page: &Page<T>) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(key.to_owned(), json!(page.items));
    body.insert(
        "next_cursor".to_owned(),
        json!(page.next_cursor.map(|c| c.to_string())),
    );
    Value::Object(body)
}
