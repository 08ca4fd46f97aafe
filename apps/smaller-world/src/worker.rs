//! Job implementations.
//!
//! Store reads and writes happen under the write lock. Network calls to the
//! push service and Twilio happen outside it.

use async_trait::async_trait;
use chrono::Utc;
use smaller_world_core::Error as CoreError;
use smaller_world_core::ids::{ActivityCouponId, NotificationId, TextBlastId};
use smaller_world_core::service::{coupons, push};

use crate::jobs::{Job, JobError, JobQueue, JobRunner};
use crate::push::PushError;
use crate::state::Services;

#[async_trait]
impl JobRunner for Services {
    async fn run(&self, job: Job, queue: &JobQueue) -> Result<(), JobError> {
        match job {
            Job::PushNotification(id) => self.push_notification(id).await,
            Job::SendTextBlast(id) => self.send_text_blast(id).await,
            Job::SendSms { to, body } => Ok(self.sms.send(&to, &body).await?),
            Job::ScheduleActivityCouponReminders => self.schedule_coupon_reminders(queue).await,
            Job::SendActivityCouponReminder(id) => self.send_coupon_reminder(id, queue).await,
        }
    }
}

impl Services {
    async fn push_notification(&self, id: NotificationId) -> Result<(), JobError> {
        let deliveries = {
            let _guard = self.write_lock.lock().await;
            match push::plan_notification_pushes(&self.ctx(), id) {
                Ok(deliveries) => deliveries,
                Err(CoreError::NotFound { .. }) => {
                    tracing::debug!(notification = %id, "notification gone, nothing to push");
                    return Ok(());
                }
                Err(error) => return Err(error.into()),
            }
        };
        for delivery in &deliveries {
            match self.push.send(delivery).await {
                Ok(()) => {}
                Err(PushError::Gone(_)) => {
                    let _guard = self.write_lock.lock().await;
                    push::drop_subscription(&self.ctx(), delivery.subscription.id)?;
                }
                Err(error) => {
                    tracing::error!(notification = %id, endpoint = %delivery.subscription.endpoint, %error, "push failed");
                }
            }
        }
        let _guard = self.write_lock.lock().await;
        push::mark_pushed(&self.ctx(), id, Utc::now())?;
        Ok(())
    }

    async fn send_text_blast(&self, id: TextBlastId) -> Result<(), JobError> {
        let message = {
            let _guard = self.write_lock.lock().await;
            push::plan_text_blast(&self.ctx(), id)?
        };
        let Some(message) = message else {
            tracing::debug!(text_blast = %id, "text blast already sent");
            return Ok(());
        };
        self.sms.send(&message.to, &message.body).await?;
        let _guard = self.write_lock.lock().await;
        push::mark_text_blast_sent(&self.ctx(), id, Utc::now())?;
        Ok(())
    }

    async fn schedule_coupon_reminders(&self, queue: &JobQueue) -> Result<(), JobError> {
        let now = Utc::now();
        let plans = {
            let _guard = self.write_lock.lock().await;
            coupons::schedule_reminders(&self.ctx(), now)?
        };
        tracing::info!(count = plans.len(), "scheduling coupon reminders");
        for plan in plans {
            let delay = (plan.run_at - now).to_std().unwrap_or_default();
            queue.enqueue(Job::SendActivityCouponReminder(plan.coupon_id), delay);
        }
        Ok(())
    }

    async fn send_coupon_reminder(&self, id: ActivityCouponId, queue: &JobQueue) -> Result<(), JobError> {
        let outcome = {
            let _guard = self.write_lock.lock().await;
            coupons::send_coupon_reminder(&self.ctx(), id, Utc::now())?
        };
        if outcome.value.is_none() {
            tracing::debug!(coupon = %id, "coupon reminder no longer needed");
        }
        queue.dispatch(outcome.effects);
        Ok(())
    }
}
