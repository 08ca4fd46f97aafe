//! # Configuration
//!
//! `smaller-world.toml`, read with serde + toml. Every section has defaults,
//! so an empty file (or no file) gives a working development setup.

use serde::Deserialize;
use smaller_world_core::{Links, Settings};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `auth.token_secret`.
pub const TOKEN_SECRET_ENV: &str = "SMALLER_WORLD_TOKEN_SECRET";

/// Feature flag that subscribes a world's owner to every public post.
pub const PUBLIC_POST_NOTIFICATIONS: &str = "public_post_notifications";

const DEVELOPMENT_TOKEN_SECRET: &str = "development-token-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("auth.token_secret (or {TOKEN_SECRET_ENV}) is required in production")]
    MissingTokenSecret,

    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
    pub auth: AuthConfig,
    pub web_push: WebPushConfig,
    pub twilio: Option<TwilioConfig>,
    pub supabase: Option<SupabaseConfig>,
    pub overrides: Vec<WorldOverride>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub base_url: String,
    pub shortlink_base_url: Option<String>,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_owned(),
            base_url: "http://localhost:3000".to_owned(),
            shortlink_base_url: None,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("smaller-world.redb"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_threads: usize,
    /// Defaults to 60 s in production and 5 s in development.
    pub notification_delay_secs: Option<u64>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_threads: 2,
            notification_delay_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_secret: Option<String>,
    pub special_occasion_code: Option<String>,
    pub admin_phone_numbers: Vec<String>,
    pub login_rate_limit: RateLimitConfig,
}

/// `requests` per `period_secs`, per client.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 10,
            period_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebPushConfig {
    pub vapid_private_key_path: Option<PathBuf>,
    /// Uncompressed P-256 public key, base64url.
    pub vapid_public_key: Option<String>,
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub sender_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    pub project_id: String,
    pub public_key: String,
    pub jwt_secret: String,
    /// Overrides `https://{project_id}.supabase.co`.
    #[serde(default)]
    pub api_url: Option<String>,
}

impl SupabaseConfig {
    pub fn url(&self) -> String {
        match &self.api_url {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("https://{}.supabase.co", self.project_id),
        }
    }
}

/// Per-world settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorldOverride {
    pub handle: String,
    #[serde(default)]
    pub feature_flags: Vec<String>,
    #[serde(default)]
    pub membership_tier: Option<String>,
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::parse(&raw)?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV)
            && !secret.is_empty()
        {
            config.auth.token_secret = Some(secret);
        }
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Secret for signed tokens. Development falls back to a fixed value.
    pub fn token_secret(&self) -> Result<String, ConfigError> {
        match (&self.auth.token_secret, self.environment) {
            (Some(secret), _) if !secret.is_empty() => Ok(secret.clone()),
            (_, Environment::Development) => Ok(DEVELOPMENT_TOKEN_SECRET.to_owned()),
            (_, Environment::Production) => Err(ConfigError::MissingTokenSecret),
        }
    }

    pub fn notification_delay(&self) -> Duration {
        let default = if self.production() { 60 } else { 5 };
        Duration::from_secs(self.jobs.notification_delay_secs.unwrap_or(default))
    }

    pub fn links(&self) -> Result<Links, ConfigError> {
        Ok(Links::new(
            &self.server.base_url,
            self.server.shortlink_base_url.as_deref(),
        )?)
    }

    /// Domain settings derived from this config.
    pub fn settings(&self) -> Settings {
        Settings {
            notification_delay: self.notification_delay(),
            public_post_subscriber_handles: self
                .overrides
                .iter()
                .filter(|o| o.feature_flags.iter().any(|f| f == PUBLIC_POST_NOTIFICATIONS))
                .map(|o| o.handle.trim().to_lowercase())
                .collect(),
            admin_phone_numbers: self.auth.admin_phone_numbers.clone(),
            special_occasion_code: self.auth.special_occasion_code.clone(),
            deliver_login_codes: self.production() || self.twilio.is_some(),
        }
    }

    pub fn membership_tier(&self, handle: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|o| o.handle.eq_ignore_ascii_case(handle))
            .and_then(|o| o.membership_tier.as_deref())
    }
}
