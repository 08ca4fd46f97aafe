//! # Jobs
//!
//! In-process background queue on tokio.
//!
//! - Delayed execution: a job waits out its delay before taking a worker.
//! - `max_threads` jobs run at once.
//! - Jobs with a key run one at a time: while a keyed job is enqueued or
//!   running, enqueueing the same key is a no-op.
//! - No retries. Failures are logged.
//!
//! A daily cron at 00:00 UTC schedules coupon reminders, and [`recover`]
//! re-enqueues pushes and text blasts left over from a previous run.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, Utc};
use dashmap::DashSet;
use smaller_world_core::Effect;
use smaller_world_core::ids::{ActivityCouponId, NotificationId, TextBlastId};
use smaller_world_core::service::push::{unpushed_notifications, unsent_text_blasts};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::push::PushError;
use crate::sms::SmsError;
use crate::state::Services;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    PushNotification(NotificationId),
    SendTextBlast(TextBlastId),
    SendSms { to: String, body: String },
    ScheduleActivityCouponReminders,
    SendActivityCouponReminder(ActivityCouponId),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PushNotification(_) => "push_notification",
            Self::SendTextBlast(_) => "send_text_blast",
            Self::SendSms { .. } => "send_sms",
            Self::ScheduleActivityCouponReminders => "schedule_activity_coupon_reminders",
            Self::SendActivityCouponReminder(_) => "send_activity_coupon_reminder",
        }
    }

    /// Concurrency key. `None` means unlimited.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::PushNotification(id) => Some(format!("{}:{id}", self.name())),
            Self::SendTextBlast(id) => Some(format!("{}:{id}", self.name())),
            Self::SendActivityCouponReminder(id) => Some(format!("{}:{id}", self.name())),
            Self::ScheduleActivityCouponReminders => Some(self.name().to_owned()),
            Self::SendSms { .. } => None,
        }
    }

    /// The job (and its delay) that carries out an effect.
    pub fn from_effect(effect: Effect) -> (Self, Duration) {
        match effect {
            Effect::PushNotification { id, delay } => (Self::PushNotification(id), delay),
            Effect::SendTextBlast { id, delay } => (Self::SendTextBlast(id), delay),
            Effect::SendSms { to, body } => (Self::SendSms { to, body }, Duration::ZERO),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => f.write_str(&key),
            None => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Core(#[from] smaller_world_core::Error),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Sms(#[from] SmsError),
}

/// Executes jobs. Follow-up work goes back on `queue`.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job, queue: &JobQueue) -> Result<(), JobError>;
}

// =============================================================================
// QUEUE
// =============================================================================

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    runner: Arc<dyn JobRunner>,
    workers: Semaphore,
    keys: DashSet<String>,
    pending: AtomicUsize,
    idle: Notify,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("pending", &self.pending())
            .field("workers_available", &self.inner.workers.available_permits())
            .finish()
    }
}

impl JobQueue {
    pub fn new(runner: Arc<dyn JobRunner>, max_threads: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                workers: Semaphore::new(max_threads.max(1)),
                keys: DashSet::new(),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Enqueued plus running jobs.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Queue a job to run after `delay`. Returns false when a job with the
    /// same key is already enqueued or running.
    pub fn enqueue(&self, job: Job, delay: Duration) -> bool {
        let key = job.key();
        if let Some(key) = &key
            && !self.inner.keys.insert(key.clone())
        {
            tracing::debug!(job = job.name(), key = %key, "job skipped, already enqueued");
            return false;
        }
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let queue = self.clone();
        tokio::spawn(async move { queue.execute(job, key, delay).await });
        true
    }

    /// Enqueue the jobs for a list of effects.
    pub fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            let (job, delay) = Job::from_effect(effect);
            self.enqueue(job, delay);
        }
    }

    async fn execute(self, job: Job, key: Option<String>, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let name = job.name();
        let label = job.to_string();
        match self.inner.workers.acquire().await {
            Ok(_permit) => {
                tracing::info!(job = name, key = %label, "job started");
                match self.inner.runner.run(job, &self).await {
                    Ok(()) => tracing::info!(job = name, key = %label, "job finished"),
                    Err(error) => tracing::error!(job = name, key = %label, %error, "job failed"),
                }
            }
            Err(error) => tracing::error!(job = name, %error, "job queue closed"),
        }
        if let Some(key) = key {
            self.inner.keys.remove(&key);
        }
        if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    /// Wait until nothing is enqueued or running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

// =============================================================================
// CRON + RECOVERY
// =============================================================================

/// The next midnight UTC strictly after `now`.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| now.date_naive());
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Schedule coupon reminders every day at 00:00 UTC.
pub fn spawn_daily_cron(queue: JobQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let wait = (next_midnight(now) - now).to_std().unwrap_or(Duration::from_secs(60));
            tokio::time::sleep(wait).await;
            queue.enqueue(Job::ScheduleActivityCouponReminders, Duration::ZERO);
        }
    })
}

/// Re-enqueue unpushed notifications and unsent text blasts. Returns how
/// many jobs were queued.
pub async fn recover(services: &Services, queue: &JobQueue) -> Result<usize, JobError> {
    let (notifications, blasts) = {
        let _guard = services.write_lock.lock().await;
        let ctx = services.ctx();
        (unpushed_notifications(&ctx)?, unsent_text_blasts(&ctx)?)
    };
    let mut queued = 0;
    for notification in notifications {
        if queue.enqueue(Job::PushNotification(notification.id), Duration::ZERO) {
            queued += 1;
        }
    }
    for blast in blasts {
        if queue.enqueue(Job::SendTextBlast(blast.id), Duration::ZERO) {
            queued += 1;
        }
    }
    tracing::info!(queued, "recovered pending jobs");
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_group_by_record() {
        let id = NotificationId::new();
        assert_eq!(
            Job::PushNotification(id).key(),
            Some(format!("push_notification:{id}"))
        );
        assert_eq!(
            Job::SendSms {
                to: "+15555550100".to_owned(),
                body: "hi".to_owned()
            }
            .key(),
            None
        );
    }

    #[test]
    fn midnight_is_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(next_midnight(now), Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
        let late = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap();
        assert_eq!(next_midnight(late), Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
    }
}
