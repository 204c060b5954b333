//! Upstream source adapters.
//!
//! Each adapter normalizes one upstream's payloads into [`CanonicalEvent`]s.
//! Adapters own event-code mapping, UTC timestamp normalization,
//! milestone/exception classification against the catalog, and location
//! extraction. They never fabricate external ids.

pub mod carrier;
pub mod customs;
pub mod industry_feed;
pub mod manual;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::entities::shipment;
use crate::entities::tracking_event::{EventCategory, EventSeverity};
use crate::entities::tracking_source::SourceType;

pub use carrier::CarrierAdapter;
pub use customs::CustomsAdapter;
pub use industry_feed::IndustryFeedAdapter;
pub use manual::ManualAdapter;

/// Adapter failure split the scheduler depends on: transient failures are
/// retried on the next interval, permanent ones wait for operator
/// intervention.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("permanent upstream failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// A normalized tracking event before persistence. The pipeline stamps ids,
/// source id, and bookkeeping flags on insert.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub event_code: String,
    pub description: String,
    pub category: EventCategory,
    pub location_name: Option<String>,
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    pub airport_code: Option<String>,
    pub event_datetime: DateTime<Utc>,
    pub event_timezone: Option<String>,
    pub is_milestone: bool,
    pub is_exception: bool,
    pub is_critical: bool,
    pub severity: EventSeverity,
    pub external_event_id: Option<String>,
    pub source_reference: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub additional_info: Option<Value>,
    pub customer_visible: bool,
}

impl CanonicalEvent {
    /// Minimal constructor; classification fields default to a plain
    /// informational status update.
    pub fn new(
        event_code: impl Into<String>,
        description: impl Into<String>,
        event_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            event_code: event_code.into(),
            description: description.into(),
            category: EventCategory::StatusUpdate,
            location_name: None,
            location_country: None,
            location_city: None,
            airport_code: None,
            event_datetime,
            event_timezone: None,
            is_milestone: false,
            is_exception: false,
            is_critical: false,
            severity: EventSeverity::Info,
            external_event_id: None,
            source_reference: None,
            latitude: None,
            longitude: None,
            temperature_celsius: None,
            humidity_percent: None,
            additional_info: None,
            customer_visible: true,
        }
    }
}

/// One upstream integration. `fetch` may return an empty list (no new
/// data), partial data, or fail with the transient/permanent split.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn fetch(
        &self,
        shipment: &shipment::Model,
    ) -> Result<Vec<CanonicalEvent>, AdapterError>;
}

/// The adapter set the scheduler drives.
pub type AdapterSet = Vec<Arc<dyn SourceAdapter>>;
