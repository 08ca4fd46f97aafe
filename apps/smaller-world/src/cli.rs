//! # CLI Module
//!
//! Command implementations behind `main.rs`.
//!
//! Commands:
//! - `init` - create the database
//! - `status` - record counts and pending work
//! - `create-user` - register a user and their world without a login code
//! - `push-missing` - notify friends who have not seen a post yet
//! - `serve` - HTTP API, job queue and daily cron

use chrono::Utc;
use serde::Serialize;
use smaller_world_core::ids::PostId;
use smaller_world_core::model::{
    Activity, ActivityCoupon, Friend, Invitation, JoinRequest, Notification, Post, PushSubscription,
    TextBlast, User, World,
};
use smaller_world_core::service::auth::{NewUser, create_user};
use smaller_world_core::service::posts::push_missing_notifications;
use smaller_world_core::service::push::{unpushed_notifications, unsent_text_blasts};
use smaller_world_core::{Context, Effect, RedbStore, Signer, Store, StoreExt};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api::router;
use crate::config::Config;
use crate::error::CliError;
use crate::jobs::{JobQueue, recover, spawn_daily_cron};
use crate::state::{Services, app_state, gateways, services, spawn_limiter_cleanup};

// =============================================================================
// HELPERS
// =============================================================================

/// Open an existing database.
pub fn open_store(db_path: &Path) -> Result<RedbStore, CliError> {
    if !db_path.exists() {
        return Err(CliError::NotInitialized(db_path.display().to_string()));
    }
    Ok(RedbStore::open(db_path)?)
}

/// Run `op` against `store` with the domain settings from `config`.
fn with_context<T>(
    store: &dyn Store,
    config: &Config,
    op: impl FnOnce(&Context<'_>) -> Result<T, CliError>,
) -> Result<T, CliError> {
    let links = config.links()?;
    let signer = Signer::new(&config.token_secret()?);
    let settings = config.settings();
    op(&Context::new(store, &links, &signer, &settings))
}

/// Services over the database with the configured gateways.
fn open_services(config: &Config, db_path: &Path) -> Result<Arc<Services>, CliError> {
    let store: Arc<dyn Store> = Arc::new(open_store(db_path)?);
    let (push, sms) = gateways(config)?;
    Ok(Arc::new(services(config, store, push, sms)?))
}

// =============================================================================
// INIT
// =============================================================================

/// Create a fresh database. `force` replaces an existing one.
pub fn cmd_init(db_path: &Path, force: bool) -> Result<(), CliError> {
    if db_path.exists() {
        if !force {
            return Err(CliError::AlreadyExists(db_path.display().to_string()));
        }
        std::fs::remove_file(db_path)?;
        tracing::warn!(path = %db_path.display(), "replaced existing database");
    }
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    RedbStore::create(db_path)?;
    println!("Initialized database at {}", db_path.display());
    Ok(())
}

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub users: u64,
    pub worlds: u64,
    pub friends: u64,
    pub invitations: u64,
    pub join_requests: u64,
    pub posts: u64,
    pub activities: u64,
    pub activity_coupons: u64,
    pub notifications: u64,
    pub push_subscriptions: u64,
    pub text_blasts: u64,
    pub unpushed_notifications: usize,
    pub unsent_text_blasts: usize,
}

/// Record counts and pending work for a store.
pub fn status(store: &dyn Store, config: &Config) -> Result<Status, CliError> {
    with_context(store, config, |ctx| {
        Ok(Status {
            users: store.count::<User>()?,
            worlds: store.count::<World>()?,
            friends: store.count::<Friend>()?,
            invitations: store.count::<Invitation>()?,
            join_requests: store.count::<JoinRequest>()?,
            posts: store.count::<Post>()?,
            activities: store.count::<Activity>()?,
            activity_coupons: store.count::<ActivityCoupon>()?,
            notifications: store.count::<Notification>()?,
            push_subscriptions: store.count::<PushSubscription>()?,
            text_blasts: store.count::<TextBlast>()?,
            unpushed_notifications: unpushed_notifications(ctx)?.len(),
            unsent_text_blasts: unsent_text_blasts(ctx)?.len(),
        })
    })
}

pub fn cmd_status(db_path: &Path, config: &Config, json: bool) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let status = status(&store, config)?;
    if json {
        let out = serde_json::to_string_pretty(&status)
            .map_err(|e| CliError::Invalid(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }
    println!("smaller world database: {}", db_path.display());
    println!("  users:               {}", status.users);
    println!("  worlds:              {}", status.worlds);
    println!("  friends:             {}", status.friends);
    println!("  invitations:         {}", status.invitations);
    println!("  join requests:       {}", status.join_requests);
    println!("  posts:               {}", status.posts);
    println!("  activities:          {}", status.activities);
    println!("  activity coupons:    {}", status.activity_coupons);
    println!("  notifications:       {}", status.notifications);
    println!("  push subscriptions:  {}", status.push_subscriptions);
    println!("  text blasts:         {}", status.text_blasts);
    println!("  unpushed:            {}", status.unpushed_notifications);
    println!("  unsent text blasts:  {}", status.unsent_text_blasts);
    Ok(())
}

// =============================================================================
// CREATE USER
// =============================================================================

/// Register a user and their world, skipping the login code.
pub fn cmd_create_user(db_path: &Path, config: &Config, params: &NewUser) -> Result<User, CliError> {
    let store = open_store(db_path)?;
    let outcome = with_context(&store, config, |ctx| Ok(create_user(ctx, params, Utc::now())?))?;
    let (user, world) = outcome.value;
    println!("Created {} (@{}) with id {}", user.name, world.handle, user.id);
    Ok(user)
}

// =============================================================================
// PUSH MISSING
// =============================================================================

/// Notify friends who have not seen `post_id`, then wait for the pushes to
/// go out. Returns how many notifications were created.
pub async fn cmd_push_missing(db_path: &Path, config: &Config, post_id: PostId) -> Result<usize, CliError> {
    let services = open_services(config, db_path)?;
    let queue = JobQueue::new(services.clone(), config.jobs.max_threads);
    let outcome = {
        let _guard = services.write_lock.lock().await;
        push_missing_notifications(&services.ctx(), post_id)?
    };
    // Run right away rather than after the usual settle delay.
    let effects = outcome
        .effects
        .into_iter()
        .map(|effect| match effect {
            Effect::PushNotification { id, .. } => Effect::PushNotification {
                id,
                delay: Duration::ZERO,
            },
            other => other,
        })
        .collect();
    queue.dispatch(effects);
    queue.wait_idle().await;
    println!("Pushed {} missing notifications for post {post_id}", outcome.value);
    Ok(outcome.value)
}

// =============================================================================
// SERVE
// =============================================================================

pub async fn cmd_serve(db_path: &Path, config: &Config) -> Result<(), CliError> {
    let services = open_services(config, db_path)?;
    let state = app_state(config, services.clone());

    let recovered = recover(&services, &state.jobs).await?;
    if recovered > 0 {
        tracing::info!(recovered, "re-enqueued jobs from a previous run");
    }
    let cron = spawn_daily_cron(state.jobs.clone());
    let limiter_cleanup = spawn_limiter_cleanup(
        state.clone(),
        Duration::from_secs(config.auth.login_rate_limit.period_secs.max(1)),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %config.server.bind,
        base_url = %config.server.base_url,
        environment = ?config.environment,
        "smaller world listening"
    );
    axum::serve(
        listener,
        router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cron.abort();
    limiter_cleanup.abort();
    tracing::info!(pending = state.jobs.pending(), "shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smaller_world_core::MemoryStore;

    #[test]
    fn status_of_an_empty_store() {
        let store = MemoryStore::new();
        let status = status(&store, &Config::default()).unwrap();
        assert_eq!(status.users, 0);
        assert_eq!(status.unpushed_notifications, 0);
    }
}
