//! Phone login codes.

use crate::error::ValidationErrors;
use crate::ids::LoginRequestId;
use crate::storage::impl_record;
use crate::validate::normalize_phone_number;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long a login code stays usable.
pub const LOGIN_CODE_LIFETIME_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub id: LoginRequestId,
    pub phone_number: String,
    /// Six digits.
    pub login_code: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl_record!(LoginRequest, LoginRequestId, "login_requests", "login request");

impl LoginRequest {
    /// New request with a random code.
    #[must_use]
    pub fn new(phone_number: &str, now: DateTime<Utc>) -> Self {
        let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self {
            id: LoginRequestId::new(),
            phone_number: normalize_phone_number(phone_number)
                .unwrap_or_else(|| phone_number.trim().to_owned()),
            login_code: format!("{code:06}"),
            completed_at: None,
            created_at: now,
        }
    }

    #[must_use]
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.phone_number.is_empty() {
            errors.add("phone_number", "can't be blank");
        } else if normalize_phone_number(&self.phone_number).as_deref()
            != Some(self.phone_number.as_str())
        {
            errors.add("phone_number", "is invalid");
        }
        errors
    }

    /// Incomplete and younger than five minutes.
    #[must_use]
    pub fn valid(&self, now: DateTime<Utc>) -> bool {
        self.completed_at.is_none()
            && now < self.created_at + Duration::seconds(LOGIN_CODE_LIFETIME_SECS)
    }

    /// SMS body carrying the code.
    #[must_use]
    pub fn message(&self) -> String {
        format!("your login code for smaller world is: {}", self.login_code)
    }
}
