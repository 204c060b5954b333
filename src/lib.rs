//! Cargotrack API library.
//!
//! Air-cargo shipment tracking backbone: event ingestion and
//! normalization, deduplication against the canonical log, derived
//! shipment state, scheduled upstream polling, push fan-out, and
//! out-of-band notifications.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod adapters;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod hub;
pub mod ingestion;
pub mod notifications;
pub mod rate_limiter;
pub mod scheduler;
pub mod stores;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;

use crate::entities::tracking_source::{self, SourceType};
use crate::errors::ServiceError;

/// Shared application state injected into every handler and session.
/// Everything is constructed once at process start; there are no globals.
#[derive(Clone)]
pub struct AppState {
    pub db: db::DbPool,
    pub config: config::AppConfig,
    pub auth: auth::AuthService,
    pub shipments: stores::ShipmentStore,
    pub events: stores::EventStore,
    pub subscriptions: stores::SubscriptionStore,
    pub pipeline: ingestion::TrackingPipeline,
    pub hub: Arc<hub::TrackingHub>,
    pub scheduler: Arc<scheduler::PollScheduler>,
    pub manual_adapter: Arc<adapters::ManualAdapter>,
    pub catalog: Arc<catalog::MilestoneCatalog>,
    pub snapshot_cache: Arc<cache::SnapshotCache>,
    pub rate_limiter: Arc<rate_limiter::RateLimiter>,
}

impl AppState {
    /// Resolves the reference id of a source type from storage.
    pub async fn source_id(&self, source_type: SourceType) -> Result<i32, ServiceError> {
        let source = tracking_source::Entity::find()
            .filter(tracking_source::Column::SourceType.eq(source_type))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal(format!("source {} not seeded", source_type))
            })?;
        Ok(source.id)
    }
}
