use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a tracking event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    #[sea_orm(string_value = "STATUS_UPDATE")]
    StatusUpdate,
    #[sea_orm(string_value = "LOCATION_UPDATE")]
    LocationUpdate,
    #[sea_orm(string_value = "MILESTONE")]
    Milestone,
    #[sea_orm(string_value = "EXCEPTION")]
    Exception,
    #[sea_orm(string_value = "NOTIFICATION")]
    Notification,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventCategory::StatusUpdate => "STATUS_UPDATE",
            EventCategory::LocationUpdate => "LOCATION_UPDATE",
            EventCategory::Milestone => "MILESTONE",
            EventCategory::Exception => "EXCEPTION",
            EventCategory::Notification => "NOTIFICATION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    #[sea_orm(string_value = "INFO")]
    Info,
    #[sea_orm(string_value = "WARNING")]
    Warning,
    #[sea_orm(string_value = "ERROR")]
    Error,
    #[sea_orm(string_value = "CRITICAL")]
    Critical,
}

/// Canonical tracking event. Append-only; rows are immutable after insert
/// except for the `notification_sent` flag maintained by the dispatcher.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tracking_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub event_code: String,
    pub description: String,
    pub category: EventCategory,
    pub location_name: Option<String>,
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    pub airport_code: Option<String>,
    /// Absolute event time, normalized to UTC by the adapter.
    pub event_datetime: DateTime<Utc>,
    /// Original upstream timezone, informational only.
    pub event_timezone: Option<String>,
    pub is_milestone: bool,
    pub is_exception: bool,
    pub is_critical: bool,
    pub severity: EventSeverity,
    pub source_id: Option<i32>,
    /// Stable upstream identifier, carried through when the source has one.
    /// Never fabricated; absence forces time-window dedup.
    pub external_event_id: Option<String>,
    pub source_reference: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    /// Opaque structured blob from the adapter, serialized as text.
    pub additional_info: Option<Json>,
    pub customer_visible: bool,
    pub processed: bool,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::shipment::Entity",
        from = "Column::ShipmentId",
        to = "super::shipment::Column::Id"
    )]
    Shipment,
}

impl Related<super::shipment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shipment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Best human-facing location string: airport code when present,
    /// otherwise the location name.
    pub fn location_label(&self) -> Option<String> {
        self.airport_code
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.location_name.as_deref().filter(|s| !s.is_empty()))
            .map(|s| s.to_string())
    }

    /// Whether this event warrants the out-of-band critical frame on the
    /// push channel.
    pub fn is_noteworthy(&self) -> bool {
        self.is_critical || self.is_exception || self.is_milestone
    }
}
