use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::catalog::MilestoneCatalog;
use crate::config::FeedConfig;
use crate::entities::shipment;
use crate::entities::tracking_event::{EventCategory, EventSeverity};
use crate::entities::tracking_source::SourceType;

use super::{AdapterError, CanonicalEvent, SourceAdapter};

/// Adapter for the external industry tracking data feed.
///
/// The feed speaks CIMP-style status codes per AWB; this adapter maps them
/// to canonical codes, normalizes timestamps to UTC and classifies events
/// against the milestone catalog.
pub struct IndustryFeedAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    catalog: Arc<MilestoneCatalog>,
}

/// Wire shape of one feed event. Internal to this adapter.
#[derive(Debug, Deserialize)]
struct FeedEvent {
    status_code: String,
    #[serde(default)]
    remarks: Option<String>,
    /// RFC 3339 with the station's local offset
    occurred_at: String,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    station: Option<FeedStation>,
    #[serde(default)]
    flight: Option<String>,
    #[serde(default)]
    pieces: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FeedStation {
    #[serde(default)]
    iata: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    events: Vec<FeedEvent>,
}

impl IndustryFeedAdapter {
    pub fn new(config: &FeedConfig, catalog: Arc<MilestoneCatalog>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            catalog,
        }
    }

    /// Feed vocabulary to canonical event codes. Unknown codes fall through
    /// to `map_unknown`.
    fn canonical_code(status_code: &str) -> Option<&'static str> {
        match status_code {
            "BKD" => Some("SHIPMENT_CREATED"),
            "PUP" => Some("CARGO_COLLECTED"),
            "RCS" => Some("CARGO_RECEIVED"),
            "MAN" => Some("MANIFESTED"),
            "DEP" => Some("FLIGHT_DEPARTED"),
            "ARR" => Some("FLIGHT_ARRIVED"),
            "RCF" => Some("TRANSSHIPMENT"),
            "CCD" => Some("CUSTOMS_CLEARED"),
            "CUS" => Some("CUSTOMS_CLEARANCE_START"),
            "OFD" => Some("OUT_FOR_DELIVERY"),
            "DLV" => Some("DELIVERED"),
            "DIS" => Some("CARGO_DAMAGED"),
            "DLY" => Some("DELAY"),
            "HLD" => Some("SHIPMENT_ON_HOLD"),
            _ => None,
        }
    }

    fn classify(&self, code: &str) -> (EventCategory, bool, bool, bool, EventSeverity) {
        let is_milestone = self.catalog.is_milestone(code);
        let is_exception = matches!(code, "CARGO_DAMAGED" | "DELAY" | "SHIPMENT_ON_HOLD");
        let is_critical = self.catalog.is_critical(code) || code == "CARGO_DAMAGED";
        let severity = match code {
            "CARGO_DAMAGED" => EventSeverity::Error,
            "DELAY" | "SHIPMENT_ON_HOLD" => EventSeverity::Warning,
            _ => EventSeverity::Info,
        };
        let category = if is_exception {
            EventCategory::Exception
        } else if is_milestone {
            EventCategory::Milestone
        } else {
            EventCategory::StatusUpdate
        };
        (category, is_milestone, is_exception, is_critical, severity)
    }

    fn normalize(&self, awb: &str, raw: FeedEvent) -> Option<CanonicalEvent> {
        let parsed: DateTime<FixedOffset> = match raw.occurred_at.parse() {
            Ok(t) => t,
            Err(e) => {
                warn!(awb, occurred_at = %raw.occurred_at, error = %e, "feed event with unparseable timestamp dropped");
                return None;
            }
        };
        let event_timezone = Some(parsed.offset().to_string());
        let event_datetime = parsed.with_timezone(&chrono::Utc);

        let (code, description) = match Self::canonical_code(&raw.status_code) {
            Some(code) => {
                let name = self
                    .catalog
                    .get(code)
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| code.to_string());
                (code.to_string(), raw.remarks.clone().unwrap_or(name))
            }
            None => {
                // An unknown upstream code is only worth keeping when it
                // carries enough metadata to be useful downstream.
                match raw.remarks.as_deref().filter(|r| !r.trim().is_empty()) {
                    Some(remarks) => ("STATUS_UPDATE".to_string(), remarks.to_string()),
                    None => {
                        warn!(awb, status_code = %raw.status_code, "unknown feed code without metadata dropped");
                        return None;
                    }
                }
            }
        };

        let (category, is_milestone, is_exception, is_critical, severity) = self.classify(&code);

        let station = raw.station;
        let additional_info = raw.flight.as_ref().map(|flight| {
            serde_json::json!({
                "flight": flight,
                "pieces": raw.pieces,
                "feed_status_code": raw.status_code,
            })
        });

        Some(CanonicalEvent {
            event_code: code,
            description,
            category,
            location_name: station.as_ref().and_then(|s| s.name.clone()),
            location_country: station.as_ref().and_then(|s| s.country.clone()),
            location_city: station.as_ref().and_then(|s| s.city.clone()),
            airport_code: station.as_ref().and_then(|s| s.iata.clone()),
            event_datetime,
            event_timezone,
            is_milestone,
            is_exception,
            is_critical,
            severity,
            // The feed's stable id is carried through untouched; when the
            // feed omits it we leave it empty and let the time-window rule
            // dedup.
            external_event_id: raw.event_id,
            source_reference: Some(format!("feed:{}", awb)),
            latitude: station.as_ref().and_then(|s| s.latitude),
            longitude: station.as_ref().and_then(|s| s.longitude),
            temperature_celsius: None,
            humidity_percent: None,
            additional_info,
            customer_visible: true,
        })
    }
}

#[async_trait]
impl SourceAdapter for IndustryFeedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::IndustryFeed
    }

    #[instrument(skip(self, shipment), fields(awb = %shipment.awb_number))]
    async fn fetch(
        &self,
        shipment: &shipment::Model,
    ) -> Result<Vec<CanonicalEvent>, AdapterError> {
        let url = format!("{}/shipments/{}/events", self.base_url, shipment.awb_number);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    AdapterError::Transient(format!("feed unreachable: {}", e))
                } else {
                    AdapterError::Permanent(format!("feed request failed: {}", e))
                }
            })?;

        match response.status() {
            StatusCode::OK => {}
            // No data for this AWB yet; not an error.
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AdapterError::Transient("feed rate limit".into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AdapterError::Permanent("feed auth rejected".into()))
            }
            status if status.is_server_error() => {
                return Err(AdapterError::Transient(format!("feed returned {}", status)))
            }
            status => {
                return Err(AdapterError::Permanent(format!("feed returned {}", status)))
            }
        }

        let body: FeedResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Permanent(format!("undecodable feed payload: {}", e)))?;

        Ok(body
            .events
            .into_iter()
            .filter_map(|raw| self.normalize(&shipment.awb_number, raw))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::milestone::{self, MilestoneCategory};
    use std::collections::HashMap;

    fn catalog() -> Arc<MilestoneCatalog> {
        let rows = [
            ("FLIGHT_DEPARTED", MilestoneCategory::Departure, true),
            ("FLIGHT_ARRIVED", MilestoneCategory::Arrival, true),
            ("DELIVERED", MilestoneCategory::Delivery, true),
            ("CARGO_COLLECTED", MilestoneCategory::Pickup, false),
        ];
        let by_code: HashMap<String, milestone::Model> = rows
            .iter()
            .enumerate()
            .map(|(i, (code, category, critical))| {
                (
                    code.to_string(),
                    milestone::Model {
                        id: i as i32 + 1,
                        code: code.to_string(),
                        name: code.to_string(),
                        category: *category,
                        sequence_order: (i as i32 + 1) * 10,
                        is_critical: *critical,
                        expected_duration_hours: None,
                        sla_hours: None,
                    },
                )
            })
            .collect();
        Arc::new(MilestoneCatalog::from_rows(by_code))
    }

    fn adapter() -> IndustryFeedAdapter {
        IndustryFeedAdapter::new(&FeedConfig::default(), catalog())
    }

    fn feed_event(code: &str, occurred_at: &str) -> FeedEvent {
        FeedEvent {
            status_code: code.to_string(),
            remarks: None,
            occurred_at: occurred_at.to_string(),
            event_id: Some("ext-1".into()),
            station: Some(FeedStation {
                iata: Some("SIN".into()),
                name: Some("Singapore Changi".into()),
                city: Some("Singapore".into()),
                country: Some("SG".into()),
                latitude: None,
                longitude: None,
            }),
            flight: Some("SQ368".into()),
            pieces: Some(2),
        }
    }

    #[test]
    fn timestamps_normalize_to_utc_and_keep_offset() {
        let event = adapter()
            .normalize("125-12345678", feed_event("DEP", "2025-08-05T22:00:00+08:00"))
            .unwrap();
        assert_eq!(
            event.event_datetime,
            "2025-08-05T14:00:00Z".parse::<DateTime<chrono::Utc>>().unwrap()
        );
        assert_eq!(event.event_timezone.as_deref(), Some("+08:00"));
    }

    #[test]
    fn known_code_maps_and_classifies() {
        let event = adapter()
            .normalize("125-12345678", feed_event("DEP", "2025-08-05T22:00:00+08:00"))
            .unwrap();
        assert_eq!(event.event_code, "FLIGHT_DEPARTED");
        assert!(event.is_milestone);
        assert!(event.is_critical);
        assert!(!event.is_exception);
        assert_eq!(event.category, EventCategory::Milestone);
        assert_eq!(event.airport_code.as_deref(), Some("SIN"));
        assert_eq!(event.external_event_id.as_deref(), Some("ext-1"));
    }

    #[test]
    fn unknown_code_with_remarks_becomes_status_update() {
        let mut raw = feed_event("XYZ", "2025-08-05T22:00:00+08:00");
        raw.remarks = Some("repacked at warehouse".into());
        let event = adapter().normalize("125-12345678", raw).unwrap();
        assert_eq!(event.event_code, "STATUS_UPDATE");
        assert!(!event.is_milestone);
    }

    #[test]
    fn unknown_code_without_metadata_is_dropped() {
        let raw = feed_event("XYZ", "2025-08-05T22:00:00+08:00");
        assert!(adapter().normalize("125-12345678", raw).is_none());
    }

    #[test]
    fn unparseable_timestamp_is_dropped() {
        let raw = feed_event("DEP", "yesterday at noon");
        assert!(adapter().normalize("125-12345678", raw).is_none());
    }

    #[test]
    fn exception_codes_carry_severity() {
        let event = adapter()
            .normalize("125-12345678", feed_event("DIS", "2025-08-05T22:00:00+08:00"))
            .unwrap();
        assert_eq!(event.event_code, "CARGO_DAMAGED");
        assert!(event.is_exception);
        assert!(event.is_critical);
        assert_eq!(event.severity, EventSeverity::Error);
        assert_eq!(event.category, EventCategory::Exception);
    }
}
