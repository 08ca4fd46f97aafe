//! Push subscriptions and notification receipts.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use smaller_world_core::model::{PushRegistration, PushSubscription};
use smaller_world_core::service::push::{self as pushes, SubscriptionParams};
use std::sync::Arc;

use super::{ApiResult, Requester};
use crate::error::ApiError;
use crate::push::PushError;
use crate::state::AppState;

fn subscription_json(subscription: &PushSubscription, registration: &PushRegistration) -> Value {
    json!({
        "push_subscription": {
            "id": subscription.id,
            "endpoint": subscription.endpoint,
            "service_worker_version": subscription.service_worker_version,
            "device_id": registration.device_id,
            "registered_at": registration.created_at,
        }
    })
}

#[derive(Debug, Deserialize)]
pub struct DeliveryParams {
    pub delivery_token: String,
}

/// Called by the service worker when a push arrives.
pub async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeliveryParams>,
) -> ApiResult<StatusCode> {
    let _guard = state.services.write_lock.lock().await;
    match pushes::mark_delivered(&state.ctx(), &params.delivery_token, Utc::now())? {
        Some(notification) => tracing::debug!(notification = %notification.id, "delivered"),
        None => tracing::debug!("delivery token for a deleted notification"),
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear(State(state): State<Arc<AppState>>, requester: Requester) -> ApiResult<StatusCode> {
    let owner = requester.notifiable().ok_or(ApiError::NotAuthenticated)?;
    let _guard = state.services.write_lock.lock().await;
    pushes::clear_notifications(&state.ctx(), owner, Utc::now())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(params): Json<SubscriptionParams>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let outcome = {
        let _guard = state.services.write_lock.lock().await;
        pushes::register_subscription(&state.ctx(), requester.notifiable(), &params, Utc::now())?
    };
    let (subscription, registration) = outcome.value;
    tracing::info!(subscription = %subscription.id, owner = ?registration.owner, "registered push subscription");
    state.jobs.dispatch(outcome.effects);
    Ok((StatusCode::CREATED, Json(subscription_json(&subscription, &registration))))
}

#[derive(Debug, Deserialize)]
pub struct EndpointParams {
    pub endpoint: String,
}

pub async fn lookup(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(params): Json<EndpointParams>,
) -> ApiResult<Json<Value>> {
    let found = pushes::lookup_subscription(&state.ctx(), requester.notifiable(), &params.endpoint)?;
    let (subscription, registration) =
        found.ok_or_else(|| ApiError::NotFound("push subscription not found".to_owned()))?;
    Ok(Json(subscription_json(&subscription, &registration)))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(params): Json<EndpointParams>,
) -> ApiResult<StatusCode> {
    let _guard = state.services.write_lock.lock().await;
    if pushes::unsubscribe(&state.ctx(), requester.notifiable(), &params.endpoint)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("push subscription not found".to_owned()))
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeParams {
    pub old_endpoint: String,
    #[serde(flatten)]
    pub subscription: SubscriptionParams,
}

/// `pushsubscriptionchange` from the service worker.
pub async fn change(
    State(state): State<Arc<AppState>>,
    Json(params): Json<ChangeParams>,
) -> ApiResult<Json<Value>> {
    let _guard = state.services.write_lock.lock().await;
    let subscription = pushes::change_subscription(
        &state.ctx(),
        &params.old_endpoint,
        &params.subscription,
        Utc::now(),
    )?;
    Ok(Json(json!({
        "push_subscription": {
            "id": subscription.id,
            "endpoint": subscription.endpoint,
        }
    })))
}

/// Send a test notification to one of the requester's devices, right away.
pub async fn test(
    State(state): State<Arc<AppState>>,
    requester: Requester,
    Json(params): Json<EndpointParams>,
) -> ApiResult<Json<Value>> {
    let delivery = pushes::plan_test_push(&state.ctx(), requester.notifiable(), &params.endpoint)?;
    let sent = match state.services.push.send(&delivery).await {
        Ok(()) => true,
        Err(PushError::Gone(_)) => {
            let _guard = state.services.write_lock.lock().await;
            pushes::drop_subscription(&state.ctx(), delivery.subscription.id)?;
            false
        }
        Err(error) => {
            tracing::warn!(endpoint = %delivery.subscription.endpoint, %error, "test push failed");
            false
        }
    };
    Ok(Json(json!({ "sent": sent })))
}

/// The VAPID application server key, in the standard base64 alphabet
/// browsers expect.
pub async fn public_key(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let key = state
        .vapid_public_key
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("web push is not configured".to_owned()))?;
    let key = key.replace('_', "/").replace('-', "+");
    Ok(Json(json!({ "publicKey": key })))
}
