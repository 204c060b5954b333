//! Notification dispatcher.
//!
//! Consumes jobs produced by the event fan-out loop, renders them per
//! delivery method, and delivers with at-least-once semantics: transient
//! failures retry with exponential backoff, completed deliveries are
//! recorded per subscription, and a sweeper re-enqueues anything the
//! post-commit emit lost.

pub mod methods;

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use rand::Rng;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::NotificationConfig;
use crate::db::DbPool;
use crate::entities::notification_delivery::{self, DeliveryStatus};
use crate::entities::tracking_subscription::{self, DeliveryMethodKind};
use crate::entities::tracking_event;
use crate::errors::ServiceError;
use crate::stores::{EventStore, SubscriptionStore};

pub use methods::{
    DeliveryMethod, DeliveryOutcome, EmailDelivery, PushDelivery, RenderedNotification,
    SmsDelivery, WebhookDelivery,
};

/// One unit of notification work: deliver `event` to `subscription`.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub event: tracking_event::Model,
    pub subscription: tracking_subscription::Model,
    pub attempt: u32,
}

/// Producer handle onto the dispatcher's work queue. Enqueueing is
/// best-effort; the sweeper reconciles drops.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationJob>,
}

impl NotificationQueue {
    pub fn new(sender: mpsc::Sender<NotificationJob>) -> Self {
        Self { sender }
    }

    pub fn enqueue(&self, event: &tracking_event::Model, sub: &tracking_subscription::Model) {
        let job = NotificationJob {
            event: event.clone(),
            subscription: sub.clone(),
            attempt: 0,
        };
        if let Err(e) = self.sender.try_send(job) {
            warn!(error = %e, "notification enqueue dropped; sweeper will recover");
            counter!("cargotrack_notification_enqueue_dropped_total").increment(1);
        }
    }
}

/// The dispatcher. Owns the registered delivery methods and their
/// concurrency limits.
pub struct NotificationDispatcher {
    db: DbPool,
    events: EventStore,
    subscriptions: SubscriptionStore,
    methods: HashMap<DeliveryMethodKind, Arc<dyn DeliveryMethod>>,
    semaphores: HashMap<DeliveryMethodKind, Arc<Semaphore>>,
    config: NotificationConfig,
    queue: NotificationQueue,
}

impl NotificationDispatcher {
    pub fn new(
        db: DbPool,
        events: EventStore,
        subscriptions: SubscriptionStore,
        methods: Vec<Arc<dyn DeliveryMethod>>,
        config: NotificationConfig,
        queue: NotificationQueue,
    ) -> Self {
        let mut method_map = HashMap::new();
        let mut semaphores = HashMap::new();
        for method in methods {
            semaphores.insert(
                method.kind(),
                Arc::new(Semaphore::new(config.method_concurrency)),
            );
            method_map.insert(method.kind(), method);
        }
        Self {
            db,
            events,
            subscriptions,
            methods: method_map,
            semaphores,
            config,
            queue,
        }
    }

    /// Work loop: runs jobs concurrently until shutdown, then drains what
    /// is in flight.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<NotificationJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("notification dispatcher started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                job = rx.recv() => {
                    match job {
                        Some(job) => {
                            let dispatcher = self.clone();
                            in_flight.spawn(async move { dispatcher.handle_job(job).await });
                        }
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                // Reap finished jobs so the set stays small.
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Flush in-flight deliveries up to the shutdown deadline.
        info!(remaining = in_flight.len(), "dispatcher draining in-flight deliveries");
        while in_flight.join_next().await.is_some() {}
        info!("notification dispatcher stopped");
    }

    /// Delivers one job with retry. At-least-once: the delivery record is
    /// written only after the method reports success.
    #[instrument(skip(self, job), fields(event_id = %job.event.id, subscription_id = %job.subscription.id))]
    async fn handle_job(&self, job: NotificationJob) {
        let method_kind = job.subscription.method;
        let Some(method) = self.methods.get(&method_kind) else {
            error!(method = %method_kind, "no delivery method registered");
            return;
        };

        // Skip anything already delivered; the sweeper may re-enqueue
        // generously.
        match self.completed_delivery(job.event.id, job.subscription.id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "delivery record lookup failed");
                return;
            }
        }

        let permit = match self.semaphores.get(&method_kind) {
            Some(sem) => sem.clone().acquire_owned().await,
            None => return,
        };
        let _permit = match permit {
            Ok(p) => p,
            Err(_) => return,
        };

        let rendered = method.render(&job.event, &job.subscription);
        let deadline = Duration::from_secs(self.config.delivery_timeout_secs);

        let mut attempt = job.attempt;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                deadline,
                method.deliver(&job.subscription.endpoint, &rendered),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => DeliveryOutcome::Transient("delivery deadline exceeded".to_string()),
            };

            match outcome {
                DeliveryOutcome::Ok => {
                    counter!("cargotrack_notifications_delivered_total").increment(1);
                    if let Err(e) = self.record_delivery(&job, attempt, None).await {
                        error!(error = %e, "failed to record delivery");
                    }
                    return;
                }
                DeliveryOutcome::Transient(reason) if attempt < self.config.max_attempts => {
                    counter!("cargotrack_notifications_retried_total").increment(1);
                    warn!(attempt, %reason, "transient delivery failure, backing off");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                DeliveryOutcome::Transient(reason) => {
                    counter!("cargotrack_notifications_failed_total").increment(1);
                    error!(attempt, %reason, "delivery attempts exhausted");
                    if let Err(e) = self.record_failure(&job, attempt, &reason).await {
                        error!(error = %e, "failed to record delivery failure");
                    }
                    return;
                }
                DeliveryOutcome::Permanent(reason) => {
                    counter!("cargotrack_notifications_failed_total").increment(1);
                    error!(attempt, %reason, "permanent delivery failure");
                    if let Err(e) = self.record_failure(&job, attempt, &reason).await {
                        error!(error = %e, "failed to record delivery failure");
                    }
                    return;
                }
            }
        }
    }

    /// Exponential backoff with jitter: initial * 2^(attempt-1), capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_secs.saturating_mul(1u64 << (attempt - 1).min(8));
        let capped = base.min(self.config.max_backoff_secs);
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        Duration::from_secs(capped) + Duration::from_millis(jitter_ms)
    }

    async fn completed_delivery(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let found = notification_delivery::Entity::find()
            .filter(notification_delivery::Column::EventId.eq(event_id))
            .filter(notification_delivery::Column::SubscriptionId.eq(subscription_id))
            .filter(notification_delivery::Column::Status.eq(DeliveryStatus::Delivered))
            .one(&self.db)
            .await?;
        Ok(found.is_some())
    }

    async fn record_delivery(
        &self,
        job: &NotificationJob,
        attempts: u32,
        error_msg: Option<String>,
    ) -> Result<(), ServiceError> {
        self.upsert_record(job, attempts, DeliveryStatus::Delivered, error_msg)
            .await?;
        self.maybe_mark_event_notified(&job.event).await
    }

    async fn record_failure(
        &self,
        job: &NotificationJob,
        attempts: u32,
        reason: &str,
    ) -> Result<(), ServiceError> {
        self.upsert_record(
            job,
            attempts,
            DeliveryStatus::Failed,
            Some(reason.to_string()),
        )
        .await
    }

    async fn upsert_record(
        &self,
        job: &NotificationJob,
        attempts: u32,
        status: DeliveryStatus,
        error_msg: Option<String>,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let existing = notification_delivery::Entity::find()
            .filter(notification_delivery::Column::EventId.eq(job.event.id))
            .filter(notification_delivery::Column::SubscriptionId.eq(job.subscription.id))
            .one(&self.db)
            .await?;

        let delivered_at = (status == DeliveryStatus::Delivered).then_some(now);
        match existing {
            Some(model) => {
                let prior_attempts = model.attempts;
                let mut active: notification_delivery::ActiveModel = model.into();
                active.status = Set(status);
                active.attempts = Set(prior_attempts + attempts as i32);
                active.last_error = Set(error_msg);
                active.delivered_at = Set(delivered_at);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                notification_delivery::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    event_id: Set(job.event.id),
                    subscription_id: Set(job.subscription.id),
                    status: Set(status),
                    attempts: Set(attempts as i32),
                    last_error: Set(error_msg),
                    delivered_at: Set(delivered_at),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    /// Sets the event's `notification_sent` flag once every matching active
    /// subscription has a completed delivery record.
    async fn maybe_mark_event_notified(
        &self,
        event: &tracking_event::Model,
    ) -> Result<(), ServiceError> {
        let matching: Vec<_> = self
            .subscriptions
            .active_for_shipment(event.shipment_id)
            .await?
            .into_iter()
            .filter(|s| s.matches(event))
            .collect();

        for sub in &matching {
            if !self.completed_delivery(event.id, sub.id).await? {
                return Ok(());
            }
        }
        self.events.mark_notification_sent(event.id).await
    }

    /// Sweeper pass: re-enqueues deliveries the post-commit emit lost and
    /// settles events with nothing to deliver.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64, ServiceError> {
        let since = Utc::now() - ChronoDuration::days(7);
        let pending = self.events.pending_notification(since, 500).await?;
        let mut enqueued = 0u64;

        for event in pending {
            let matching: Vec<_> = self
                .subscriptions
                .active_for_shipment(event.shipment_id)
                .await?
                .into_iter()
                .filter(|s| s.matches(&event))
                .collect();

            if matching.is_empty() {
                // Nothing subscribes to this event; settle the flag so the
                // sweeper stops revisiting it.
                self.events.mark_notification_sent(event.id).await?;
                continue;
            }

            for sub in matching {
                if !self.completed_delivery(event.id, sub.id).await? {
                    self.queue.enqueue(&event, &sub);
                    enqueued += 1;
                }
            }
        }

        if enqueued > 0 {
            info!(enqueued, "sweeper re-enqueued undelivered notifications");
        }
        Ok(enqueued)
    }

    /// Periodic sweeper loop; also runs once at startup to recover from
    /// crashes between commit and emit.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.sweep_interval_secs);
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "notification sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
