use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{shipment, tracking_event};
use crate::hub::TrackingHub;
use crate::notifications::NotificationQueue;
use crate::stores::SubscriptionStore;

/// Trimmed shipment view carried on push frames and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentSnapshot {
    pub shipment_id: Uuid,
    pub awb_number: String,
    pub current_status: shipment::ShipmentStatus,
    pub current_location: Option<String>,
    pub origin_airport: String,
    pub destination_airport: String,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub last_tracked_at: Option<DateTime<Utc>>,
}

impl From<&shipment::Model> for ShipmentSnapshot {
    fn from(model: &shipment::Model) -> Self {
        Self {
            shipment_id: model.id,
            awb_number: model.awb_number.clone(),
            current_status: model.current_status,
            current_location: model.current_location.clone(),
            origin_airport: model.origin_airport.clone(),
            destination_airport: model.destination_airport.clone(),
            estimated_delivery_date: model.estimated_delivery_date,
            delivery_date: model.delivery_date,
            last_tracked_at: model.last_tracked_at,
        }
    }
}

/// Event published on the in-process bus after an Apply commits.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub shipment_id: Uuid,
    pub customer_id: Uuid,
    pub awb_number: String,
    pub event: tracking_event::Model,
    pub snapshot: ShipmentSnapshot,
}

/// Sending half of the bus. Post-commit emits are best-effort: a full or
/// closed channel logs and drops, and the notification sweeper reconciles.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<BusEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<BusEvent>) -> Self {
        Self { sender }
    }

    pub fn emit(&self, event: BusEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "bus emit dropped; sweeper will reconcile notifications");
        }
    }
}

/// Bus consumer loop: fans each committed event out to the push hub and
/// enqueues notification jobs for matching subscriptions.
pub async fn process_events(
    mut rx: mpsc::Receiver<BusEvent>,
    hub: std::sync::Arc<TrackingHub>,
    subscriptions: SubscriptionStore,
    notification_queue: NotificationQueue,
) {
    info!("event fan-out loop started");

    while let Some(bus_event) = rx.recv().await {
        hub.publish(&bus_event);

        match subscriptions.active_for_shipment(bus_event.shipment_id).await {
            Ok(subs) => {
                for sub in subs.into_iter().filter(|s| s.matches(&bus_event.event)) {
                    notification_queue.enqueue(&bus_event.event, &sub);
                }
            }
            Err(e) => {
                warn!(
                    shipment_id = %bus_event.shipment_id,
                    error = %e,
                    "subscription lookup failed during fan-out"
                );
            }
        }
    }

    info!("event fan-out loop ended");
}
