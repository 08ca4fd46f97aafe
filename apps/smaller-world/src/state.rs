//! Shared application state.

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use smaller_world_core::{Context, Links, Settings, Signer, Store};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError, RateLimitConfig};
use crate::jobs::JobQueue;
use crate::push::{LogPushGateway, PushError, PushGateway, WebPushGateway};
use crate::sms::{LogSms, SmsSender, TwilioSms};
use crate::supabase::SupabaseAuth;

pub type LoginLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Store, domain settings and outbound gateways. Shared by request handlers
/// and jobs.
pub struct Services {
    pub store: Arc<dyn Store>,
    pub links: Links,
    pub signer: Signer,
    pub settings: Settings,
    pub push: Arc<dyn PushGateway>,
    pub sms: Arc<dyn SmsSender>,
    /// Held around every multi-step store mutation.
    pub write_lock: Mutex<()>,
}

impl Services {
    pub fn ctx(&self) -> Context<'_> {
        Context::new(self.store.as_ref(), &self.links, &self.signer, &self.settings)
    }
}

pub struct AppState {
    pub services: Arc<Services>,
    pub jobs: JobQueue,
    pub login_limiter: LoginLimiter,
    pub supabase: Option<SupabaseAuth>,
    pub vapid_public_key: Option<String>,
    /// Rate-limit on `X-Forwarded-For` instead of the peer address.
    pub trust_forwarded_for: bool,
    /// Mark cookies `Secure`.
    pub secure_cookies: bool,
    /// Echo login codes back to the client.
    pub expose_login_codes: bool,
}

impl AppState {
    pub fn ctx(&self) -> Context<'_> {
        self.services.ctx()
    }
}

pub fn login_limiter(config: RateLimitConfig) -> LoginLimiter {
    let burst = NonZeroU32::new(config.requests).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs(config.period_secs.max(1)) / burst.get();
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_minute(burst))
        .allow_burst(burst);
    RateLimiter::keyed(quota)
}

/// Drop limiter entries for clients that have been quiet long enough to be
/// back at a full quota.
pub fn spawn_limiter_cleanup(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            state.login_limiter.retain_recent();
            state.login_limiter.shrink_to_fit();
            tracing::debug!(clients = state.login_limiter.len(), "pruned login rate limiter");
        }
    })
}

/// Gateways picked from config: real ones when credentials are present,
/// logging ones otherwise.
pub fn gateways(config: &Config) -> Result<(Arc<dyn PushGateway>, Arc<dyn SmsSender>), PushError> {
    let push: Arc<dyn PushGateway> = match (
        &config.web_push.vapid_private_key_path,
        &config.web_push.contact_email,
    ) {
        (Some(path), Some(email)) => Arc::new(WebPushGateway::new(path, email)?),
        _ => {
            tracing::warn!("web push not configured, pushes will be logged");
            Arc::new(LogPushGateway)
        }
    };
    let sms: Arc<dyn SmsSender> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioSms::new(twilio.clone())),
        None => {
            tracing::warn!("twilio not configured, sms will be logged");
            Arc::new(LogSms)
        }
    };
    Ok((push, sms))
}

pub fn services(
    config: &Config,
    store: Arc<dyn Store>,
    push: Arc<dyn PushGateway>,
    sms: Arc<dyn SmsSender>,
) -> Result<Services, ConfigError> {
    Ok(Services {
        store,
        links: config.links()?,
        signer: Signer::new(&config.token_secret()?),
        settings: config.settings(),
        push,
        sms,
        write_lock: Mutex::new(()),
    })
}

/// Wire the application state and its job queue.
pub fn app_state(config: &Config, services: Arc<Services>) -> Arc<AppState> {
    let jobs = JobQueue::new(services.clone(), config.jobs.max_threads);
    Arc::new(AppState {
        services,
        jobs,
        login_limiter: login_limiter(config.auth.login_rate_limit),
        supabase: config.supabase.as_ref().map(SupabaseAuth::new),
        vapid_public_key: config.web_push.vapid_public_key.clone(),
        trust_forwarded_for: config.server.trust_forwarded_for,
        secure_cookies: config.production(),
        expose_login_codes: !config.production(),
    })
}
