//! Browser push subscriptions and the owners registered to them.

use crate::error::ValidationErrors;
use crate::ids::{PushRegistrationId, PushSubscriptionId};
use crate::model::Notifiable;
use crate::storage::impl_record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A browser's push endpoint and encryption keys.
///
/// One subscription can be shared by several owners (a user and the friends
/// whose worlds are installed on the same device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: PushSubscriptionId,
    /// Unique across subscriptions.
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub service_worker_version: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl_record!(PushSubscription, PushSubscriptionId, "push_subscriptions", "push subscription");

impl PushSubscription {
    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if !self.endpoint.starts_with("https://") {
            errors.add("endpoint", "must be an https URL");
        }
        if self.p256dh_key.trim().is_empty() {
            errors.add("p256dh_key", "can't be blank");
        }
        if self.auth_key.trim().is_empty() {
            errors.add("auth_key", "can't be blank");
        }
        errors
    }

    /// Service workers up to version 1 only understand legacy payloads.
    #[must_use]
    pub fn legacy(&self) -> bool {
        self.service_worker_version.unwrap_or(0) <= 1
    }
}

/// Links a subscription to its owner (`None` for anonymous universe
/// subscribers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRegistration {
    pub id: PushRegistrationId,
    pub owner: Option<Notifiable>,
    pub subscription_id: PushSubscriptionId,
    pub device_id: Option<String>,
    pub device_fingerprint: Option<String>,
    pub device_fingerprint_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl_record!(PushRegistration, PushRegistrationId, "push_registrations", "push registration");
