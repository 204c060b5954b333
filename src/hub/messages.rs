use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::tracking_event;
use crate::events::ShipmentSnapshot;

/// Messages a connected client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    SubscribeShipment {
        #[serde(default)]
        shipment_id: Option<Uuid>,
        #[serde(default)]
        awb: Option<String>,
    },
    UnsubscribeShipment {
        shipment_id: Uuid,
    },
    SubscribeCustomer {
        customer_id: Uuid,
    },
    Ping {},
}

/// Out-of-band notification rendering hint attached to critical frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreview {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: Uuid,
        capabilities: Vec<String>,
        server_time: DateTime<Utc>,
    },
    Authenticated {
        subscriber_id: Uuid,
    },
    AuthError {
        reason: String,
    },
    Subscribed {
        shipment_id: Uuid,
        topic: String,
        snapshot: ShipmentSnapshot,
    },
    SubscribedCustomer {
        customer_id: Uuid,
        topic: String,
    },
    SubscriptionError {
        reason: String,
    },
    TrackingEvent {
        shipment_id: Uuid,
        awb: String,
        event: tracking_event::Model,
        shipment_snapshot: ShipmentSnapshot,
    },
    CriticalUpdate {
        shipment_id: Uuid,
        awb: String,
        event: tracking_event::Model,
        shipment_snapshot: ShipmentSnapshot,
        notification: NotificationPreview,
    },
    CustomerTrackingUpdate {
        customer_id: Uuid,
        #[serde(rename = "shipmentUpdate")]
        shipment_update: ShipmentSnapshot,
    },
    BulkTrackingUpdate {
        shipment_id: Uuid,
        events: Vec<tracking_event::Model>,
    },
    SystemNotification {
        message: String,
        level: String,
        server_time: DateTime<Utc>,
    },
    ServiceShutdown {
        reason: String,
        server_time: DateTime<Utc>,
    },
    Pong {
        server_time: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Rendering for the out-of-band channel on noteworthy events.
    pub fn critical_for(
        event: &tracking_event::Model,
        snapshot: &ShipmentSnapshot,
        awb: &str,
    ) -> Self {
        let kind = if event.is_exception {
            "exception"
        } else if event.is_critical {
            "critical"
        } else {
            "milestone"
        };
        ServerMessage::CriticalUpdate {
            shipment_id: snapshot.shipment_id,
            awb: awb.to_string(),
            event: event.clone(),
            shipment_snapshot: snapshot.clone(),
            notification: NotificationPreview {
                title: format!("{} — {}", awb, event.description),
                body: match event.location_label() {
                    Some(loc) => format!("{} at {}", event.description, loc),
                    None => event.description.clone(),
                },
                kind: kind.to_string(),
            },
        }
    }
}
