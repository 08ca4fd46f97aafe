//! # Push Payloads
//!
//! JSON documents sent through web push. The service worker reads them,
//! shows the notification and reports delivery with the embedded token.

use crate::model::{Notification, PushSubscription};
use crate::notice::NotificationMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Web push `Urgency` header values (RFC 8030).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    High,
}

impl Urgency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification as understood by current service workers.
#[must_use]
pub fn notification_json(
    notification: &Notification,
    message: &NotificationMessage,
    delivery_token: Option<&str>,
) -> Value {
    json!({
        "id": notification.id,
        "type": notification.notification_type(),
        "delivery_token": delivery_token,
        "message": message,
        "created_at": notification.created_at,
    })
}

/// Notification as understood by version 1 service workers.
#[must_use]
pub fn legacy_notification_json(
    notification: &Notification,
    payload: Value,
    delivery_token: Option<&str>,
) -> Value {
    json!({
        "id": notification.id,
        "type": notification.legacy_type(),
        "delivery_token": delivery_token,
        "payload": payload,
    })
}

/// Envelope pushed to a subscription. Absent values are left out.
#[must_use]
pub fn push_payload(
    notification: Value,
    page_icon_url: Option<&str>,
    badge_count: Option<u64>,
) -> Value {
    compact([
        ("notification", notification),
        ("pageIconUrl", json!(page_icon_url)),
        ("badgeCount", json!(badge_count)),
    ])
}

/// Payload of a test push. Only current service workers get a message.
#[must_use]
pub fn test_payload(subscription: &PushSubscription, page_icon_url: Option<&str>) -> Value {
    let message = (!subscription.legacy()).then(|| {
        json!({
            "title": "test notification",
            "body": "this is a test notification. if you are seeing this, then your push notifications are working!",
        })
    });
    compact([
        ("pageIconUrl", json!(page_icon_url)),
        ("message", json!(message)),
    ])
}

fn compact<const N: usize>(entries: [(&str, Value); N]) -> Value {
    let map: Map<String, Value> = entries
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.to_owned(), value))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PostId, PushSubscriptionId};
    use crate::model::Noticeable;
    use chrono::Utc;

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "new poem".to_owned(),
            body: "roses".to_owned(),
            image_src: None,
            target_url: Some("https://smallerworld.club/kai/".to_owned()),
        }
    }

    #[test]
    fn modern_notification_shape() {
        let notification = Notification::new(Noticeable::Post(PostId::new()), None, Utc::now());
        let json = notification_json(&notification, &message(), Some("tok"));
        assert_eq!(json["type"], "Post");
        assert_eq!(json["delivery_token"], "tok");
        assert_eq!(json["message"]["title"], "new poem");
        assert!(json["message"]["image_src"].is_null());
    }

    #[test]
    fn legacy_notification_shape() {
        let notification = Notification::new(Noticeable::Post(PostId::new()), None, Utc::now());
        let json = legacy_notification_json(&notification, json!({"post": {}}), None);
        assert_eq!(json["type"], "UniversePost");
        assert!(json["delivery_token"].is_null());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn push_payload_drops_nulls() {
        let payload = push_payload(json!({"id": 1}), None, Some(3));
        assert_eq!(payload, json!({"notification": {"id": 1}, "badgeCount": 3}));
        let payload = push_payload(json!({"id": 1}), Some("/icon.png"), None);
        assert_eq!(payload, json!({"notification": {"id": 1}, "pageIconUrl": "/icon.png"}));
    }

    #[test]
    fn test_payload_by_version() {
        let now = Utc::now();
        let mut subscription = PushSubscription {
            id: PushSubscriptionId::new(),
            endpoint: "https://push.example.com/1".to_owned(),
            p256dh_key: "k".to_owned(),
            auth_key: "a".to_owned(),
            service_worker_version: Some(1),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(test_payload(&subscription, None), json!({}));
        subscription.service_worker_version = Some(2);
        let payload = test_payload(&subscription, None);
        assert_eq!(payload["message"]["title"], "test notification");
    }

    #[test]
    fn urgency_values() {
        assert_eq!(Urgency::VeryLow.as_str(), "very-low");
        assert_eq!(
            serde_json::to_string(&Urgency::High).unwrap_or_default(),
            "\"high\""
        );
    }
}
