//! # Web Push
//!
//! Sends [`PushDelivery`] values planned by the core. The payload is
//! encrypted (RFC 8291, `aes128gcm`) and signed with VAPID by the `web-push`
//! crate, then posted to the subscription endpoint with reqwest.

use async_trait::async_trait;
use smaller_world_core::service::push::PushDelivery;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessageBuilder,
};

/// Seconds a push service keeps an undelivered message.
pub const PUSH_TTL_SECS: u32 = 60 * 60 * 24;

#[derive(Debug, Error)]
pub enum PushError {
    /// The push service no longer knows the subscription (404/410).
    #[error("subscription expired or invalid: {0}")]
    Gone(String),

    #[error("push service responded {status}: {body}")]
    Response { status: u16, body: String },

    #[error("failed to build push message: {0}")]
    Build(#[from] WebPushError),

    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read VAPID key: {0}")]
    Key(#[from] std::io::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, delivery: &PushDelivery) -> Result<(), PushError>;
}

// =============================================================================
// VAPID GATEWAY
// =============================================================================

pub struct WebPushGateway {
    http: reqwest::Client,
    private_key_pem: Vec<u8>,
    subject: String,
}

impl WebPushGateway {
    pub fn new(private_key_path: &Path, contact_email: &str) -> Result<Self, PushError> {
        Ok(Self {
            http: reqwest::Client::new(),
            private_key_pem: std::fs::read(private_key_path)?,
            subject: format!("mailto:{contact_email}"),
        })
    }
}

#[async_trait]
impl PushGateway for WebPushGateway {
    async fn send(&self, delivery: &PushDelivery) -> Result<(), PushError> {
        let subscription = &delivery.subscription;
        let info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh_key,
            &subscription.auth_key,
        );
        let content = serde_json::to_vec(&delivery.payload)?;

        let mut signature = VapidSignatureBuilder::from_pem(self.private_key_pem.as_slice(), &info)?;
        signature.add_claim("sub", self.subject.as_str());
        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &content);
        builder.set_vapid_signature(signature.build()?);
        let message = builder.build()?;

        let mut request = self
            .http
            .post(&subscription.endpoint)
            .header("TTL", PUSH_TTL_SECS.to_string())
            .header("Urgency", delivery.urgency.as_str());
        if let Some(payload) = message.payload {
            request = request
                .header("Content-Encoding", "aes128gcm")
                .header("Content-Type", "application/octet-stream");
            for (name, value) in payload.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(payload.content);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(endpoint = %subscription.endpoint, %status, "sent web push");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            tracing::warn!(endpoint = %subscription.endpoint, %body, "bad subscription");
            return Err(PushError::Gone(body));
        }
        tracing::error!(endpoint = %subscription.endpoint, %status, %body, "web push error");
        Err(PushError::Response {
            status: status.as_u16(),
            body,
        })
    }
}

// =============================================================================
// LOGGING / RECORDING GATEWAYS
// =============================================================================

/// Logs pushes instead of sending them. Used when VAPID is not configured.
#[derive(Debug, Default)]
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send(&self, delivery: &PushDelivery) -> Result<(), PushError> {
        tracing::info!(
            endpoint = %delivery.subscription.endpoint,
            urgency = %delivery.urgency,
            payload = %delivery.payload,
            "web push (not sent, VAPID not configured)"
        );
        Ok(())
    }
}

/// Keeps every delivery in memory. Endpoints listed in `gone` answer as
/// expired subscriptions.
#[derive(Debug, Default)]
pub struct RecordingPushGateway {
    sent: Mutex<Vec<PushDelivery>>,
    gone: Mutex<Vec<String>>,
}

impl RecordingPushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expire(&self, endpoint: &str) {
        if let Ok(mut gone) = self.gone.lock() {
            gone.push(endpoint.to_owned());
        }
    }

    pub fn sent(&self) -> Vec<PushDelivery> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send(&self, delivery: &PushDelivery) -> Result<(), PushError> {
        let endpoint = &delivery.subscription.endpoint;
        let expired = self
            .gone
            .lock()
            .map(|gone| gone.contains(endpoint))
            .unwrap_or(false);
        if expired {
            return Err(PushError::Gone(endpoint.clone()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(delivery.clone());
        }
        Ok(())
    }
}
