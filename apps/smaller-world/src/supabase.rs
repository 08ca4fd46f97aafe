//! # Supabase Sessions
//!
//! The browser keeps its Supabase session in the `supabase_session` cookie:
//! `base64-` followed by base64url JSON holding at least `access_token` and
//! `refresh_token`. Access tokens are HS256 JWTs signed with the project's
//! JWT secret. Expired ones are exchanged for a new session through the
//! Supabase auth API and the cookie is rewritten.

use crate::config::SupabaseConfig;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "supabase_session";
const BASE64_PREFIX: &str = "base64-";

/// Padded on encode, either way on decode.
const COOKIE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("access token expired")]
    Expired,

    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("failed to refresh session: {0}")]
    Refresh(String),

    #[error("supabase responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("supabase request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Cookie contents. Fields other than the two tokens are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

impl Claims {
    pub fn authenticated(&self) -> bool {
        self.role.as_deref() == Some("authenticated")
    }
}

pub fn decode_cookie(value: &str) -> Option<SessionData> {
    let encoded = value.strip_prefix(BASE64_PREFIX)?;
    let decoded = COOKIE_ENGINE.decode(encoded).ok()?;
    serde_json::from_slice(&decoded).ok()
}

pub fn encode_cookie(data: &SessionData) -> String {
    let json = serde_json::to_vec(data).unwrap_or_default();
    format!("{BASE64_PREFIX}{}", COOKIE_ENGINE.encode(json))
}

pub struct SupabaseAuth {
    http: reqwest::Client,
    url: String,
    public_key: String,
    key: DecodingKey,
}

impl SupabaseAuth {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self::with_url(config, config.url())
    }

    pub fn with_url(config: &SupabaseConfig, url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            public_key: config.public_key.clone(),
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// Check an access token's signature and expiry.
    pub fn verify(&self, access_token: &str) -> Result<Claims, SupabaseError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        match jsonwebtoken::decode::<Claims>(access_token, &self.key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(error) if matches!(error.kind(), ErrorKind::ExpiredSignature) => {
                Err(SupabaseError::Expired)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Exchange a refresh token for a new session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionData, SupabaseError> {
        let response = self
            .http
            .post(format!("{}/auth/v1/token", self.url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.public_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response.json().await?;
        let role = body.pointer("/user/role").and_then(Value::as_str);
        if role != Some("authenticated") {
            return Err(SupabaseError::Refresh("session is not authenticated".to_owned()));
        }
        serde_json::from_value(body).map_err(|e| SupabaseError::Refresh(e.to_string()))
    }
}
