use crate::db::DbPool;
use crate::entities::milestone::{self, MilestoneCategory};
use crate::entities::shipment::ShipmentStatus;
use crate::entities::tracking_event;
use crate::entities::tracking_source::{self, SourceType};
use crate::errors::ServiceError;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use std::collections::HashMap;
use tracing::info;

/// Maps a canonical event code to the shipment status it implies, if any.
///
/// Codes that carry no status transition (location pings, generic remarks,
/// notification markers) map to `None` and never move the shipment.
/// `CANCELLED` is deliberately absent: it is an administrative transition,
/// never derived from tracking events.
pub fn status_for_code(code: &str) -> Option<ShipmentStatus> {
    match code {
        "SHIPMENT_CREATED" => Some(ShipmentStatus::Created),
        "CARGO_COLLECTED" | "CARGO_RECEIVED" => Some(ShipmentStatus::Booked),
        "MANIFESTED" => Some(ShipmentStatus::Manifested),
        "FLIGHT_DEPARTED" => Some(ShipmentStatus::Departed),
        "IN_TRANSIT" | "TRANSSHIPMENT" => Some(ShipmentStatus::InTransit),
        "FLIGHT_ARRIVED" => Some(ShipmentStatus::Arrived),
        "CUSTOMS_CLEARANCE_START" | "CUSTOMS_CLEARED" => Some(ShipmentStatus::CustomsClearance),
        "OUT_FOR_DELIVERY" => Some(ShipmentStatus::OutForDelivery),
        "DELIVERED" => Some(ShipmentStatus::Delivered),
        "SHIPMENT_ON_HOLD" => Some(ShipmentStatus::OnHold),
        "CARGO_DAMAGED" | "CUSTOMS_HELD" | "DELAY" | "EXCEPTION" => {
            Some(ShipmentStatus::Exception)
        }
        _ => None,
    }
}

/// In-memory view of the milestone catalog, loaded from the reference table
/// at startup. Adapters consult it for classification; the pipeline for
/// derivation.
#[derive(Debug, Clone, Default)]
pub struct MilestoneCatalog {
    by_code: HashMap<String, milestone::Model>,
}

impl MilestoneCatalog {
    pub async fn load(db: &DbPool) -> Result<Self, ServiceError> {
        let rows = milestone::Entity::find().all(db).await?;
        let by_code = rows.into_iter().map(|m| (m.code.clone(), m)).collect();
        Ok(Self { by_code })
    }

    pub fn from_rows(by_code: HashMap<String, milestone::Model>) -> Self {
        Self { by_code }
    }

    pub fn get(&self, code: &str) -> Option<&milestone::Model> {
        self.by_code.get(code)
    }

    pub fn is_milestone(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn is_critical(&self, code: &str) -> bool {
        self.by_code.get(code).map(|m| m.is_critical).unwrap_or(false)
    }

    /// Rough journey duration from departure onwards, used for on-demand
    /// delivery estimates when the intake left none.
    pub fn expected_transit(&self) -> Option<Duration> {
        let hours: i64 = self
            .by_code
            .values()
            .filter(|m| m.category != MilestoneCategory::Pickup)
            .filter_map(|m| m.expected_duration_hours)
            .map(|h| h as i64)
            .sum();
        (hours > 0).then(|| Duration::hours(hours))
    }
}

/// Derived shipment state computed from the full event log.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedState {
    pub status: Option<ShipmentStatus>,
    pub location: Option<String>,
    pub delivery_date: Option<DateTime<Utc>>,
}

/// Computes derived state from a shipment's events.
///
/// The winner is the event with the greatest `(event_datetime, created_at)`
/// whose code maps to a status; location is the latest non-empty location in
/// that order, retained across events that carry none. The function is pure
/// and insensitive to input order, so late-arriving historical events
/// rederive correctly.
pub fn derive_state(events: &[tracking_event::Model]) -> DerivedState {
    let mut ordered: Vec<&tracking_event::Model> = events.iter().collect();
    ordered.sort_by_key(|e| (e.event_datetime, e.created_at));

    let mut status = None;
    let mut delivery_date = None;
    let mut location = None;

    for event in ordered {
        if let Some(mapped) = status_for_code(&event.event_code) {
            status = Some(mapped);
            delivery_date = (mapped == ShipmentStatus::Delivered).then_some(event.event_datetime);
        }
        if let Some(label) = event.location_label() {
            location = Some(label);
        }
    }

    DerivedState {
        status,
        location,
        delivery_date,
    }
}

struct MilestoneSeed {
    code: &'static str,
    name: &'static str,
    category: MilestoneCategory,
    sequence_order: i32,
    is_critical: bool,
    expected_duration_hours: Option<i32>,
    sla_hours: Option<i32>,
}

const MILESTONE_SEEDS: &[MilestoneSeed] = &[
    MilestoneSeed {
        code: "SHIPMENT_CREATED",
        name: "Shipment created",
        category: MilestoneCategory::Pickup,
        sequence_order: 5,
        is_critical: false,
        expected_duration_hours: None,
        sla_hours: None,
    },
    MilestoneSeed {
        code: "CARGO_COLLECTED",
        name: "Cargo collected",
        category: MilestoneCategory::Pickup,
        sequence_order: 10,
        is_critical: false,
        expected_duration_hours: Some(4),
        sla_hours: Some(12),
    },
    MilestoneSeed {
        code: "CARGO_RECEIVED",
        name: "Cargo received at origin facility",
        category: MilestoneCategory::Pickup,
        sequence_order: 20,
        is_critical: false,
        expected_duration_hours: Some(2),
        sla_hours: Some(8),
    },
    MilestoneSeed {
        code: "MANIFESTED",
        name: "Manifested on flight",
        category: MilestoneCategory::Departure,
        sequence_order: 30,
        is_critical: false,
        expected_duration_hours: Some(4),
        sla_hours: Some(12),
    },
    MilestoneSeed {
        code: "FLIGHT_DEPARTED",
        name: "Flight departed",
        category: MilestoneCategory::Departure,
        sequence_order: 40,
        is_critical: true,
        expected_duration_hours: Some(2),
        sla_hours: Some(6),
    },
    MilestoneSeed {
        code: "TRANSSHIPMENT",
        name: "Transshipment at hub",
        category: MilestoneCategory::Transit,
        sequence_order: 50,
        is_critical: false,
        expected_duration_hours: Some(8),
        sla_hours: Some(24),
    },
    MilestoneSeed {
        code: "FLIGHT_ARRIVED",
        name: "Flight arrived",
        category: MilestoneCategory::Arrival,
        sequence_order: 60,
        is_critical: true,
        expected_duration_hours: Some(12),
        sla_hours: Some(24),
    },
    MilestoneSeed {
        code: "CUSTOMS_CLEARANCE_START",
        name: "Customs clearance started",
        category: MilestoneCategory::Customs,
        sequence_order: 70,
        is_critical: false,
        expected_duration_hours: Some(4),
        sla_hours: Some(24),
    },
    MilestoneSeed {
        code: "CUSTOMS_CLEARED",
        name: "Customs cleared",
        category: MilestoneCategory::Customs,
        sequence_order: 80,
        is_critical: true,
        expected_duration_hours: Some(12),
        sla_hours: Some(48),
    },
    MilestoneSeed {
        code: "OUT_FOR_DELIVERY",
        name: "Out for delivery",
        category: MilestoneCategory::Delivery,
        sequence_order: 90,
        is_critical: true,
        expected_duration_hours: Some(4),
        sla_hours: Some(12),
    },
    MilestoneSeed {
        code: "DELIVERED",
        name: "Delivered",
        category: MilestoneCategory::Delivery,
        sequence_order: 100,
        is_critical: true,
        expected_duration_hours: Some(4),
        sla_hours: Some(8),
    },
];

/// Seeds the milestone catalog and source reference tables when empty.
pub async fn seed_reference_data(db: &DbPool) -> Result<(), ServiceError> {
    if milestone::Entity::find().count(db).await? == 0 {
        for (idx, seed) in MILESTONE_SEEDS.iter().enumerate() {
            milestone::ActiveModel {
                id: Set(idx as i32 + 1),
                code: Set(seed.code.to_string()),
                name: Set(seed.name.to_string()),
                category: Set(seed.category),
                sequence_order: Set(seed.sequence_order),
                is_critical: Set(seed.is_critical),
                expected_duration_hours: Set(seed.expected_duration_hours),
                sla_hours: Set(seed.sla_hours),
            }
            .insert(db)
            .await?;
        }
        info!(count = MILESTONE_SEEDS.len(), "seeded milestone catalog");
    }

    if tracking_source::Entity::find().count(db).await? == 0 {
        let sources = [
            (1, "Industry data feed", SourceType::IndustryFeed, 10),
            (2, "Carrier API", SourceType::Carrier, 20),
            (3, "Customs API", SourceType::Customs, 30),
            (4, "Ground handler", SourceType::GroundHandler, 40),
            (5, "Manual entry", SourceType::Manual, 50),
        ];
        for (id, name, source_type, priority) in sources {
            tracking_source::ActiveModel {
                id: Set(id),
                name: Set(name.to_string()),
                source_type: Set(source_type),
                priority: Set(priority),
                active: Set(true),
            }
            .insert(db)
            .await?;
        }
        info!("seeded tracking sources");
    }

    Ok(())
}
