//! Login codes, sessions and registration.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use smaller_world_core::ids::LoginRequestId;
use smaller_world_core::model::User;
use smaller_world_core::service::auth::{self, LoginVerification};
use std::sync::Arc;

use super::{ApiResult, ClientInfo, SESSION_COOKIE, cookie, set_cookie};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequestParams {
    pub phone_number: String,
}

pub async fn create_login_request(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(params): Json<LoginRequestParams>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.login_limiter.check_key(&client.ip).is_err() {
        tracing::warn!(ip = %client.ip, "login request rate limited");
        return Err(ApiError::RateLimited);
    }
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        auth::create_login_request(&state.ctx(), &params.phone_number, Utc::now())?
    };
    let request = outcome.value;
    tracing::info!(login_request = %request.id, code = %request.login_code, "created login request");
    state.jobs.dispatch(outcome.effects);

    let mut body = json!({ "login_request": { "id": request.id } });
    if state.expose_login_codes {
        body["login_code"] = json!(request.login_code);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub login_request_id: LoginRequestId,
    pub login_code: String,
}

fn with_session(state: &AppState, user: &User, client: &ClientInfo, body: serde_json::Value) -> ApiResult<Response> {
    let (_, token) = auth::start_session(
        &state.ctx(),
        user,
        &client.ip.to_string(),
        &client.user_agent,
        Utc::now(),
    )?;
    let header = set_cookie(SESSION_COOKIE, &token, state.secure_cookies)
        .ok_or_else(|| ApiError::Internal("invalid session cookie".to_owned()))?;
    Ok(([(SET_COOKIE, header)], Json(body)).into_response())
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(params): Json<LoginParams>,
) -> ApiResult<Response> {
    let _guard = state.services.write_lock.lock().await;
    let verification = auth::verify_login(
        &state.ctx(),
        params.login_request_id,
        &params.login_code,
        Utc::now(),
    )?;
    match verification {
        LoginVerification::Existing(user) => {
            tracing::info!(user = %user.id, "signed in");
            with_session(&state, &user, &client, json!({ "user": user }))
        }
        LoginVerification::Registration { token } => {
            Ok(Json(json!({ "registration_token": token })).into_response())
        }
    }
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: axum::http::HeaderMap) -> ApiResult<Response> {
    if let Some(token) = cookie(&headers, SESSION_COOKIE) {
        let _guard = state.services.write_lock.lock().await;
        let ctx = state.ctx();
        if let Some((session, _)) = auth::resume_session(&ctx, &token, Utc::now())? {
            auth::terminate_session(&ctx, session.id)?;
        }
    }
    let header = set_cookie(SESSION_COOKIE, "", state.secure_cookies)
        .ok_or_else(|| ApiError::Internal("invalid session cookie".to_owned()))?;
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, header)]).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RegistrationParams {
    pub registration_token: String,
    pub name: String,
    pub handle: String,
    pub time_zone: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(params): Json<RegistrationParams>,
) -> ApiResult<Response> {
    let _guard = state.services.write_lock.lock().await;
    let outcome = auth::register(
        &state.ctx(),
        &params.registration_token,
        &params.name,
        &params.handle,
        &params.time_zone,
        Utc::now(),
    )?;
    let (user, world) = outcome.value;
    tracing::info!(user = %user.id, handle = %world.handle, "registered");
    state.jobs.dispatch(outcome.effects);
    with_session(&state, &user, &client, json!({ "user": user, "world": world }))
}
