use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::MilestoneCatalog;
use crate::entities::shipment;
use crate::entities::tracking_event::{EventCategory, EventSeverity};
use crate::entities::tracking_source::SourceType;

use super::{AdapterError, CanonicalEvent, SourceAdapter};

/// Manual-entry source. Operators push events through the HTTP surface, so
/// polling this source yields nothing; the adapter's job is building a
/// correctly classified canonical event from operator input.
pub struct ManualAdapter {
    catalog: Arc<MilestoneCatalog>,
}

/// Operator-supplied event fields before classification.
#[derive(Debug, Clone)]
pub struct ManualEventInput {
    pub event_code: String,
    pub description: String,
    pub event_datetime: DateTime<Utc>,
    pub location_name: Option<String>,
    pub airport_code: Option<String>,
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    pub is_exception: bool,
    pub customer_visible: bool,
    pub additional_info: Option<Value>,
}

impl ManualAdapter {
    pub fn new(catalog: Arc<MilestoneCatalog>) -> Self {
        Self { catalog }
    }

    /// Classifies operator input against the catalog. Manual events carry no
    /// external id: the time-window rule dedups repeated entry.
    pub fn build_event(&self, input: ManualEventInput) -> CanonicalEvent {
        let is_milestone = self.catalog.is_milestone(&input.event_code);
        let is_critical = self.catalog.is_critical(&input.event_code);
        let category = if input.is_exception {
            EventCategory::Exception
        } else if is_milestone {
            EventCategory::Milestone
        } else {
            EventCategory::StatusUpdate
        };
        let severity = if input.is_exception {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };

        CanonicalEvent {
            event_code: input.event_code,
            description: input.description,
            category,
            location_name: input.location_name,
            location_country: input.location_country,
            location_city: input.location_city,
            airport_code: input.airport_code,
            event_datetime: input.event_datetime,
            event_timezone: None,
            is_milestone,
            is_exception: input.is_exception,
            is_critical,
            severity,
            external_event_id: None,
            source_reference: Some("manual".to_string()),
            latitude: None,
            longitude: None,
            temperature_celsius: None,
            humidity_percent: None,
            additional_info: input.additional_info,
            customer_visible: input.customer_visible,
        }
    }
}

#[async_trait]
impl SourceAdapter for ManualAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Manual
    }

    async fn fetch(
        &self,
        _shipment: &shipment::Model,
    ) -> Result<Vec<CanonicalEvent>, AdapterError> {
        Ok(Vec::new())
    }
}
