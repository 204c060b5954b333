use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethodKind {
    #[sea_orm(string_value = "EMAIL")]
    Email,
    #[sea_orm(string_value = "SMS")]
    Sms,
    #[sea_orm(string_value = "PUSH")]
    Push,
    #[sea_orm(string_value = "WEBHOOK")]
    Webhook,
}

impl fmt::Display for DeliveryMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryMethodKind::Email => "EMAIL",
            DeliveryMethodKind::Sms => "SMS",
            DeliveryMethodKind::Push => "PUSH",
            DeliveryMethodKind::Webhook => "WEBHOOK",
        };
        write!(f, "{}", s)
    }
}

/// Notification subscription. Unique by `(shipment_id, subscriber_id,
/// method)`; deactivated on unsubscribe, never hard-deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tracking_subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub subscriber_id: Uuid,
    pub method: DeliveryMethodKind,
    /// Delivery endpoint: address, phone number, device token or URL
    /// depending on the method.
    pub endpoint: String,
    pub on_milestone: bool,
    pub on_exception: bool,
    pub on_location_update: bool,
    pub on_all_events: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    /// Subscription filter semantics: an event matches iff the subscriber
    /// asked for everything, or any specific flag lines up with the event's
    /// classification.
    pub fn matches(&self, event: &super::tracking_event::Model) -> bool {
        if !self.active {
            return false;
        }
        self.on_all_events
            || (self.on_milestone && event.is_milestone)
            || (self.on_exception && event.is_exception)
            || (self.on_location_update
                && event.category == super::tracking_event::EventCategory::LocationUpdate)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tracking_event::{EventCategory, EventSeverity};
    use super::*;
    use chrono::Utc;

    fn event(category: EventCategory, milestone: bool, exception: bool) -> super::super::tracking_event::Model {
        super::super::tracking_event::Model {
            id: Uuid::new_v4(),
            shipment_id: Uuid::new_v4(),
            event_code: "TEST".into(),
            description: "test".into(),
            category,
            location_name: None,
            location_country: None,
            location_city: None,
            airport_code: None,
            event_datetime: Utc::now(),
            event_timezone: None,
            is_milestone: milestone,
            is_exception: exception,
            is_critical: false,
            severity: EventSeverity::Info,
            source_id: None,
            external_event_id: None,
            source_reference: None,
            latitude: None,
            longitude: None,
            temperature_celsius: None,
            humidity_percent: None,
            additional_info: None,
            customer_visible: true,
            processed: true,
            notification_sent: false,
            created_at: Utc::now(),
        }
    }

    fn subscription(milestone: bool, exception: bool, location: bool, all: bool) -> Model {
        Model {
            id: Uuid::new_v4(),
            shipment_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            method: DeliveryMethodKind::Email,
            endpoint: "ops@example.com".into(),
            on_milestone: milestone,
            on_exception: exception,
            on_location_update: location,
            on_all_events: all,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn milestone_only_filter_ignores_location_updates() {
        let sub = subscription(true, false, false, false);
        assert!(sub.matches(&event(EventCategory::Milestone, true, false)));
        assert!(!sub.matches(&event(EventCategory::LocationUpdate, false, false)));
    }

    #[test]
    fn all_events_matches_everything() {
        let sub = subscription(false, false, false, true);
        assert!(sub.matches(&event(EventCategory::LocationUpdate, false, false)));
        assert!(sub.matches(&event(EventCategory::Exception, false, true)));
    }

    #[test]
    fn inactive_subscription_never_matches() {
        let mut sub = subscription(false, false, false, true);
        sub.active = false;
        assert!(!sub.matches(&event(EventCategory::Milestone, true, false)));
    }
}
