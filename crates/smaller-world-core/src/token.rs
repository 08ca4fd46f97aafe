//! # Signed Tokens
//!
//! Purpose-scoped, tamper-evident tokens: delivery receipts for push
//! notifications, post-login registration and session cookies.
//!
//! Format: `base64url(json claims) "." base64url(mac)` where the MAC is a
//! keyed BLAKE3 hash of the encoded claims. The key is derived from the
//! configured secret, so rotating the secret invalidates every token.
//!
//! A token also carries a *fingerprint* of the state it was issued for.
//! Callers compare it against the current state, which makes a token
//! single-use without storing it (a delivery token stops working once the
//! notification is marked delivered).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

const KEY_CONTEXT: &str = "smaller world 2025-01 signed token";

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Marks a notification as delivered.
    Delivery,
    /// Lets a verified phone number register an account.
    Registration,
    /// Browser session cookie.
    Session,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token issued for another purpose")]
    WrongPurpose,
    #[error("token expired")]
    Expired,
    #[error("token no longer valid")]
    Stale,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    purpose: Purpose,
    id: Uuid,
    fingerprint: String,
    expires_at: Option<i64>,
}

/// Claims of a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub id: Uuid,
    pub fingerprint: String,
}

impl Verified {
    /// Fail with [`TokenError::Stale`] unless the fingerprint matches.
    pub fn expect_fingerprint(self, current: &str) -> Result<Uuid, TokenError> {
        if bool::from(self.fingerprint.as_bytes().ct_eq(current.as_bytes())) {
            Ok(self.id)
        } else {
            Err(TokenError::Stale)
        }
    }
}

/// Issues and verifies tokens with a secret-derived key.
#[derive(Clone)]
pub struct Signer {
    key: [u8; 32],
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        }
    }

    /// Sign a token for a record.
    #[must_use]
    pub fn sign(
        &self,
        purpose: Purpose,
        id: impl Into<Uuid>,
        fingerprint: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> String {
        let claims = Claims {
            purpose,
            id: id.into(),
            fingerprint: fingerprint.to_owned(),
            expires_at: expires_at.map(|t| t.timestamp()),
        };
        // Serializing a struct of plain fields to JSON cannot fail.
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(mac.as_bytes()))
    }

    /// Verify signature, purpose and expiry.
    pub fn verify(
        &self,
        token: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<Verified, TokenError> {
        let (payload, mac) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let mac = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|_| TokenError::Malformed)?;
        let expected = blake3::keyed_hash(&self.key, payload.as_bytes());
        if !bool::from(expected.as_bytes().as_slice().ct_eq(mac.as_slice())) {
            return Err(TokenError::BadSignature);
        }
        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;
        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose);
        }
        if let Some(expires_at) = claims.expires_at
            && now.timestamp() >= expires_at
        {
            return Err(TokenError::Expired);
        }
        Ok(Verified {
            id: claims.id,
            fingerprint: claims.fingerprint,
        })
    }
}

/// Fingerprint of a notification's delivery state.
#[must_use]
pub fn delivery_fingerprint(delivered: bool) -> &'static str {
    if delivered { "delivered" } else { "pending" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn signer() -> Signer {
        Signer::new("test secret")
    }

    #[test]
    fn roundtrip() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let token = signer().sign(Purpose::Delivery, id, "pending", None);
        let verified = signer().verify(&token, Purpose::Delivery, now).unwrap();
        assert_eq!(verified.clone().expect_fingerprint("pending"), Ok(id));
        assert_eq!(verified.expect_fingerprint("delivered"), Err(TokenError::Stale));
    }

    #[test]
    fn purpose_is_checked() {
        let token = signer().sign(Purpose::Session, Uuid::new_v4(), "", None);
        assert_eq!(
            signer().verify(&token, Purpose::Delivery, Utc::now()),
            Err(TokenError::WrongPurpose)
        );
    }

    #[test]
    fn expiry_is_checked() {
        let now = Utc::now();
        let token = signer().sign(
            Purpose::Registration,
            Uuid::new_v4(),
            "",
            Some(now + Duration::hours(1)),
        );
        assert!(signer().verify(&token, Purpose::Registration, now).is_ok());
        assert_eq!(
            signer().verify(&token, Purpose::Registration, now + Duration::hours(2)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = signer().sign(Purpose::Session, Uuid::new_v4(), "", None);
        assert_eq!(
            Signer::new("other").verify(&token, Purpose::Session, Utc::now()),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            signer().verify("garbage", Purpose::Session, Utc::now()),
            Err(TokenError::Malformed)
        );
    }

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

    proptest! {
        #[test]
        fn tampered_tokens_fail(index in 0usize..512, pick in 0usize..64) {
            let token = signer().sign(Purpose::Delivery, Uuid::new_v4(), "pending", None);
            let index = index % token.len();
            let mut bytes = token.into_bytes();
            let replacement = ALPHABET[pick];
            prop_assume!(bytes[index] != replacement);
            bytes[index] = replacement;
            let tampered = String::from_utf8(bytes).unwrap();
            prop_assert!(signer().verify(&tampered, Purpose::Delivery, Utc::now()).is_err());
        }
    }
}
