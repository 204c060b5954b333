use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shipment lifecycle status.
///
/// `Delivered` and `Cancelled` are terminal: a shipment in either state is
/// tracking-quiescent and never selected by the poll scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    #[sea_orm(string_value = "CREATED")]
    Created,
    #[sea_orm(string_value = "BOOKED")]
    Booked,
    #[sea_orm(string_value = "MANIFESTED")]
    Manifested,
    #[sea_orm(string_value = "DEPARTED")]
    Departed,
    #[sea_orm(string_value = "IN_TRANSIT")]
    InTransit,
    #[sea_orm(string_value = "ARRIVED")]
    Arrived,
    #[sea_orm(string_value = "CUSTOMS_CLEARANCE")]
    CustomsClearance,
    #[sea_orm(string_value = "OUT_FOR_DELIVERY")]
    OutForDelivery,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "ON_HOLD")]
    OnHold,
    #[sea_orm(string_value = "EXCEPTION")]
    Exception,
}

impl ShipmentStatus {
    /// Terminal states stop polling and accept no further derivation changes
    /// short of administrative intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShipmentStatus::Created => "CREATED",
            ShipmentStatus::Booked => "BOOKED",
            ShipmentStatus::Manifested => "MANIFESTED",
            ShipmentStatus::Departed => "DEPARTED",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::Arrived => "ARRIVED",
            ShipmentStatus::CustomsClearance => "CUSTOMS_CLEARANCE",
            ShipmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::Cancelled => "CANCELLED",
            ShipmentStatus::OnHold => "ON_HOLD",
            ShipmentStatus::Exception => "EXCEPTION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Air Waybill number, `NNN-NNNNNNNN`. Globally unique and immutable.
    #[sea_orm(unique)]
    pub awb_number: String,
    pub customer_id: Uuid,
    pub origin_airport: String,
    pub destination_airport: String,
    /// Ordered transit airport codes
    pub route: Option<Json>,
    pub flight_number: Option<String>,
    pub flight_date: Option<DateTime<Utc>>,
    pub pieces: i32,
    pub weight_kg: Decimal,
    pub volume_cbm: Option<Decimal>,
    pub commodity_description: Option<String>,
    pub declared_value: Option<Decimal>,
    pub declared_value_currency: Option<String>,
    pub current_status: ShipmentStatus,
    pub current_location: Option<String>,
    pub pickup_date: Option<DateTime<Utc>>,
    /// Set iff the shipment reached `DELIVERED`; carries the event time of
    /// the delivering event.
    pub delivery_date: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub tracking_enabled: bool,
    pub tracking_frequency_minutes: i32,
    pub last_tracked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tracking_event::Entity")]
    TrackingEvents,
    #[sea_orm(has_many = "super::tracking_subscription::Entity")]
    Subscriptions,
}

impl Related<super::tracking_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrackingEvents.def()
    }
}

impl Related<super::tracking_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_quiescent(&self) -> bool {
        self.current_status.is_terminal()
    }

    /// Due-for-poll predicate evaluated against the given instant.
    pub fn is_due_for_poll(&self, now: DateTime<Utc>) -> bool {
        if !self.tracking_enabled || self.is_quiescent() {
            return false;
        }
        match self.last_tracked_at {
            None => true,
            Some(last) => {
                now.signed_duration_since(last)
                    >= chrono::Duration::minutes(self.tracking_frequency_minutes as i64)
            }
        }
    }
}
