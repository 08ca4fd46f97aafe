//! SMS delivery through Twilio.

use crate::config::TwilioConfig;
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("twilio responded {status}: {body}")]
    Response { status: u16, body: String },

    #[error("twilio request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError>;
}

/// Posts to the Twilio Messages API.
pub struct TwilioSms {
    http: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioSms {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.sender_number.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!(to, "sent sms");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SmsError::Response {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Default)]
pub struct LogSms;

#[async_trait]
impl SmsSender for LogSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        tracing::info!(to, body, "sms (not sent, twilio not configured)");
        Ok(())
    }
}

/// Keeps messages in memory.
#[derive(Debug, Default)]
pub struct RecordingSms {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(to, body)` pairs in sending order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.to_owned(), body.to_owned()));
        }
        Ok(())
    }
}
