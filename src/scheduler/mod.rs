//! Poll scheduler.
//!
//! No per-shipment timers: a global tick sweeps the store for due
//! shipments, bounded per tick, and fans the upstream fetches out under
//! per-source semaphores. Survives restarts with no state beyond
//! `last_tracked_at`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{AdapterError, AdapterSet, SourceAdapter};
use crate::config::SchedulerConfig;
use crate::db::DbPool;
use crate::entities::shipment;
use crate::entities::tracking_source::{self, SourceType};
use crate::errors::ServiceError;
use crate::ingestion::TrackingPipeline;
use crate::stores::ShipmentStore;

/// Outcome of one scheduler tick.
#[derive(Debug, Default, Clone)]
pub struct TickSummary {
    pub selected: usize,
    pub events_created: usize,
    pub duplicates: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
}

/// Drives the source adapters for shipments due a refresh.
pub struct PollScheduler {
    db: DbPool,
    shipments: ShipmentStore,
    pipeline: TrackingPipeline,
    adapters: AdapterSet,
    semaphores: HashMap<SourceType, Arc<Semaphore>>,
    config: SchedulerConfig,
}

impl PollScheduler {
    pub fn new(
        db: DbPool,
        shipments: ShipmentStore,
        pipeline: TrackingPipeline,
        adapters: AdapterSet,
        config: SchedulerConfig,
    ) -> Self {
        let semaphores = adapters
            .iter()
            .map(|a| {
                (
                    a.source_type(),
                    Arc::new(Semaphore::new(config.source_concurrency)),
                )
            })
            .collect();
        Self {
            db,
            shipments,
            pipeline,
            adapters,
            semaphores,
            config,
        }
    }

    /// Tick loop. A shutdown signal lets the tick in progress drain before
    /// the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.interval_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_minutes = self.config.interval_minutes, "poll scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) => {
                            debug!(
                                selected = summary.selected,
                                created = summary.events_created,
                                "tick complete"
                            );
                        }
                        Err(e) => error!(error = %e, "scheduler tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("poll scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep: select due shipments, refresh each through every active
    /// external source, stamp the poll cursor exactly once per shipment.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<TickSummary, ServiceError> {
        let tick_time = Utc::now();
        let due = self
            .shipments
            .due_for_poll(tick_time, self.config.batch_size)
            .await?;
        counter!("cargotrack_scheduler_selected_total").increment(due.len() as u64);

        let sources = self.active_sources().await?;
        let mut summary = TickSummary {
            selected: due.len(),
            ..Default::default()
        };

        let refreshes = due
            .iter()
            .map(|s| self.refresh_shipment(s, &sources, tick_time));
        for outcome in join_all(refreshes).await {
            summary.events_created += outcome.events_created;
            summary.duplicates += outcome.duplicates;
            summary.transient_failures += outcome.transient_failures;
            summary.permanent_failures += outcome.permanent_failures;
        }

        Ok(summary)
    }

    /// Operator-initiated refresh of a single shipment, outside the tick
    /// cadence. Quiescent shipments are left untouched.
    pub async fn refresh_by_id(&self, shipment_id: uuid::Uuid) -> Result<TickSummary, ServiceError> {
        let target = self
            .shipments
            .by_id(shipment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("shipment {}", shipment_id)))?;
        if target.is_quiescent() {
            return Ok(TickSummary::default());
        }
        let sources = self.active_sources().await?;
        Ok(self.refresh_shipment(&target, &sources, Utc::now()).await)
    }

    /// Refreshes one shipment across all pollable sources in parallel.
    /// `last_tracked_at` is stamped with the tick time regardless of
    /// outcome, so failures wait for the next interval instead of
    /// accelerating.
    async fn refresh_shipment(
        &self,
        target: &shipment::Model,
        sources: &HashMap<SourceType, tracking_source::Model>,
        tick_time: DateTime<Utc>,
    ) -> TickSummary {
        let mut summary = TickSummary::default();

        let fetches = self
            .adapters
            .iter()
            .filter(|a| a.source_type() != SourceType::Manual)
            .filter_map(|a| sources.get(&a.source_type()).map(|s| (a, s.id)))
            .map(|(adapter, source_id)| self.fetch_one(adapter.as_ref(), target, source_id));

        for (source_id, result) in join_all(fetches).await {
            match result {
                Ok(events) => {
                    for canonical in events {
                        match self.pipeline.apply(target.id, canonical, source_id).await {
                            Ok(outcome) if outcome.is_created() => summary.events_created += 1,
                            Ok(crate::ingestion::ApplyOutcome::Duplicate) => {
                                summary.duplicates += 1
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(shipment_id = %target.id, error = %e, "apply failed during poll");
                            }
                        }
                    }
                }
                Err(AdapterError::Transient(reason)) => {
                    summary.transient_failures += 1;
                    counter!("cargotrack_scheduler_transient_failures_total").increment(1);
                    warn!(shipment_id = %target.id, %reason, "transient fetch failure, retrying next interval");
                }
                Err(AdapterError::Permanent(reason)) => {
                    summary.permanent_failures += 1;
                    counter!("cargotrack_scheduler_permanent_failures_total").increment(1);
                    error!(shipment_id = %target.id, %reason, "permanent fetch failure, operator intervention needed");
                }
            }
        }

        if let Err(e) = self.shipments.touch_last_tracked(target.id, tick_time).await {
            error!(shipment_id = %target.id, error = %e, "failed to stamp poll cursor");
        }

        summary
    }

    /// One bounded, deadline-guarded fetch.
    async fn fetch_one(
        &self,
        adapter: &dyn SourceAdapter,
        target: &shipment::Model,
        source_id: i32,
    ) -> (i32, Result<Vec<crate::adapters::CanonicalEvent>, AdapterError>) {
        let semaphore = match self.semaphores.get(&adapter.source_type()) {
            Some(sem) => sem.clone(),
            None => {
                return (
                    source_id,
                    Err(AdapterError::Permanent("no semaphore for source".into())),
                )
            }
        };
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return (source_id, Ok(Vec::new())),
        };

        let deadline = Duration::from_secs(self.config.adapter_timeout_secs);
        let result = match tokio::time::timeout(deadline, adapter.fetch(target)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Transient(format!(
                "fetch deadline of {:?} exceeded",
                deadline
            ))),
        };
        (source_id, result)
    }

    async fn active_sources(
        &self,
    ) -> Result<HashMap<SourceType, tracking_source::Model>, ServiceError> {
        let rows = tracking_source::Entity::find()
            .filter(tracking_source::Column::Active.eq(true))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|s| (s.source_type, s)).collect())
    }
}
