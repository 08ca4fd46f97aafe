//! Integration tests for the job queue and the jobs it runs.
//!
//! Time is paused, so delayed jobs complete as soon as everything else is
//! idle.

#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use smaller_world::config::Config;
use smaller_world::jobs::{Job, JobError, JobQueue, JobRunner, recover};
use smaller_world::push::RecordingPushGateway;
use smaller_world::sms::RecordingSms;
use smaller_world::state::{Services, services};
use smaller_world_core::ids::NotificationId;
use smaller_world_core::model::{Friend, Notifiable, Notification, PostType, TextBlast, User, Visibility};
use smaller_world_core::service::auth::{NewUser, create_user};
use smaller_world_core::service::friends::{InvitationParams, accept_invitation, create_invitation};
use smaller_world_core::service::posts::{NewPost, create_post};
use smaller_world_core::service::push::{SubscriptionParams, register_subscription};
use smaller_world_core::{Effect, MemoryStore, StoreExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// HELPERS
// =============================================================================

/// Counts runs and tracks how many jobs ran at once.
#[derive(Default)]
struct CountingRunner {
    runs: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    finished_at: Mutex<Vec<Instant>>,
}

#[async_trait]
impl JobRunner for CountingRunner {
    async fn run(&self, _job: Job, _queue: &JobQueue) -> Result<(), JobError> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.finished_at.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

fn sms(body: &str) -> Job {
    Job::SendSms {
        to: "+15555550100".to_owned(),
        body: body.to_owned(),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

struct Fixture {
    services: Arc<Services>,
    push: Arc<RecordingPushGateway>,
    sms: Arc<RecordingSms>,
    queue: JobQueue,
}

fn fixture() -> Fixture {
    let push = Arc::new(RecordingPushGateway::new());
    let sms = Arc::new(RecordingSms::new());
    let services = Arc::new(
        services(
            &Config::default(),
            Arc::new(MemoryStore::new()),
            push.clone(),
            sms.clone(),
        )
        .unwrap(),
    );
    let queue = JobQueue::new(services.clone(), 2);
    Fixture {
        services,
        push,
        sms,
        queue,
    }
}

fn owner(fx: &Fixture) -> User {
    let outcome = create_user(
        &fx.services.ctx(),
        &NewUser {
            name: "kai".to_owned(),
            phone_number: "+15555550101".to_owned(),
            time_zone_name: "America/New_York".to_owned(),
            handle: "kai-world".to_owned(),
        },
        t0(),
    )
    .unwrap();
    outcome.value.0
}

fn friend_with_phone(fx: &Fixture, user: &User, name: &str, phone: &str) -> Friend {
    let ctx = fx.services.ctx();
    let invitation = create_invitation(
        &ctx,
        user,
        &InvitationParams {
            invitee_name: name.to_owned(),
            ..InvitationParams::default()
        },
        t0(),
    )
    .unwrap();
    accept_invitation(&ctx, invitation.id, Some(phone), t0()).unwrap().value
}

fn register_device(fx: &Fixture, friend: &Friend, endpoint: &str) {
    let params: SubscriptionParams = serde_json::from_value(serde_json::json!({
        "endpoint": endpoint,
        "p256dh_key": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM",
        "auth_key": "tBHItJI5svbpez7KI4CCXg",
        "service_worker_version": 2,
    }))
    .unwrap();
    register_subscription(
        &fx.services.ctx(),
        Some(Notifiable::Friend(friend.id)),
        &params,
        t0(),
    )
    .unwrap();
}

fn post_for(fx: &Fixture, author: &User, friends: &[&Friend]) -> Vec<Effect> {
    let params: NewPost = serde_json::from_value(serde_json::json!({
        "type": PostType::JournalEntry,
        "visibility": Visibility::Friends,
        "title": "today",
        "body_text": "went to the beach",
        "friend_ids_to_notify": friends.iter().map(|f| f.id).collect::<Vec<_>>(),
    }))
    .unwrap();
    create_post(&fx.services.ctx(), author, &params, t0() + ChronoDuration::hours(1))
        .unwrap()
        .effects
}

// =============================================================================
// QUEUE TESTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_keyed_jobs_are_deduplicated() {
    let runner = Arc::new(CountingRunner::default());
    let queue = JobQueue::new(runner.clone(), 2);
    let id = NotificationId::new();

    assert!(queue.enqueue(Job::PushNotification(id), Duration::from_secs(5)));
    assert!(!queue.enqueue(Job::PushNotification(id), Duration::ZERO));
    assert!(queue.enqueue(Job::PushNotification(NotificationId::new()), Duration::ZERO));
    queue.wait_idle().await;

    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    // The key is free again once the job finished.
    assert!(queue.enqueue(Job::PushNotification(id), Duration::ZERO));
    queue.wait_idle().await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unkeyed_jobs_always_run() {
    let runner = Arc::new(CountingRunner::default());
    let queue = JobQueue::new(runner.clone(), 2);

    assert!(queue.enqueue(sms("one"), Duration::ZERO));
    assert!(queue.enqueue(sms("one"), Duration::ZERO));
    queue.wait_idle().await;

    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_jobs_wait_out_their_delay() {
    let runner = Arc::new(CountingRunner::default());
    let queue = JobQueue::new(runner.clone(), 2);
    let start = Instant::now();

    queue.enqueue(sms("later"), Duration::from_secs(60));
    assert_eq!(queue.pending(), 1);
    queue.wait_idle().await;

    let finished = runner.finished_at.lock().unwrap().clone();
    assert_eq!(finished.len(), 1);
    assert!(finished[0] - start >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_max_threads_bounds_concurrency() {
    let runner = Arc::new(CountingRunner::default());
    let queue = JobQueue::new(runner.clone(), 2);

    for i in 0..6 {
        queue.enqueue(sms(&i.to_string()), Duration::ZERO);
    }
    queue.wait_idle().await;

    assert_eq!(runner.runs.load(Ordering::SeqCst), 6);
    assert!(runner.max_running.load(Ordering::SeqCst) <= 2);
}

// =============================================================================
// JOB TESTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_post_notifications_are_pushed_to_devices() {
    let fx = fixture();
    let kai = owner(&fx);
    let sam = friend_with_phone(&fx, &kai, "sam", "+15555550102");
    register_device(&fx, &sam, "https://push.example.com/sam");

    let effects = post_for(&fx, &kai, &[&sam]);
    assert!(
        effects
            .iter()
            .any(|e| matches!(e, Effect::PushNotification { .. }))
    );
    fx.queue.dispatch(effects);
    fx.queue.wait_idle().await;

    let sent = fx.push.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subscription.endpoint, "https://push.example.com/sam");
    assert!(sent[0].payload["notification"]["delivery_token"].is_string());

    let store = fx.services.store.as_ref();
    let notifications: Vec<Notification> = store
        .filter(|n: &Notification| n.recipient == Some(Notifiable::Friend(sam.id)))
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].pushed());
}

#[tokio::test(start_paused = true)]
async fn test_text_only_friends_get_a_text_blast() {
    let fx = fixture();
    let kai = owner(&fx);
    let ana = friend_with_phone(&fx, &kai, "ana", "+15555550103");

    let effects = post_for(&fx, &kai, &[&ana]);
    fx.queue.dispatch(effects);
    fx.queue.wait_idle().await;

    let texts: Vec<(String, String)> = fx
        .sms
        .sent()
        .into_iter()
        .filter(|(to, _)| to == "+15555550103")
        .collect();
    // The installation link from accepting was never dispatched.
    assert_eq!(texts.len(), 1);
    assert!(fx.push.sent().is_empty());

    let blasts: Vec<TextBlast> = fx.services.store.as_ref().all().unwrap();
    assert_eq!(blasts.len(), 1);
    assert!(blasts[0].sent_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_expired_subscriptions_are_dropped() {
    let fx = fixture();
    let kai = owner(&fx);
    let sam = friend_with_phone(&fx, &kai, "sam", "+15555550102");
    register_device(&fx, &sam, "https://push.example.com/gone");
    fx.push.expire("https://push.example.com/gone");

    fx.queue.dispatch(post_for(&fx, &kai, &[&sam]));
    fx.queue.wait_idle().await;

    let ctx = fx.services.ctx();
    assert!(!ctx.notifiable(Notifiable::Friend(sam.id)).unwrap());
    let notification: Notification = ctx
        .store
        .find(|n: &Notification| n.recipient == Some(Notifiable::Friend(sam.id)))
        .unwrap()
        .unwrap();
    assert!(notification.pushed());
}

#[tokio::test(start_paused = true)]
async fn test_recover_requeues_unfinished_work() {
    let fx = fixture();
    let kai = owner(&fx);
    let sam = friend_with_phone(&fx, &kai, "sam", "+15555550102");
    register_device(&fx, &sam, "https://push.example.com/sam");
    let ana = friend_with_phone(&fx, &kai, "ana", "+15555550103");

    // Effects from a previous run that never made it onto a queue.
    let _lost = post_for(&fx, &kai, &[&sam, &ana]);

    let queued = recover(&fx.services, &fx.queue).await.unwrap();
    assert!(queued >= 2);
    fx.queue.wait_idle().await;

    assert_eq!(fx.push.sent().len(), 1);
    assert!(fx.sms.sent().iter().any(|(to, _)| to == "+15555550103"));
    assert_eq!(recover(&fx.services, &fx.queue).await.unwrap(), 0);
}
