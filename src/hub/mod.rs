//! In-process subscription and fan-out hub.
//!
//! Two logical topic families: `shipment:{id}` for every event on a
//! shipment, `customer:{id}` for every shipment a customer owns. Clients
//! are long-lived sessions with bounded outbound queues; publishing never
//! blocks — a saturated queue drops its oldest frame and counts the drop.

pub mod messages;
pub mod session;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::events::BusEvent;

pub use messages::{ClientMessage, NotificationPreview, ServerMessage};

/// Hub topic address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Shipment(Uuid),
    Customer(Uuid),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Shipment(id) => write!(f, "shipment:{}", id),
            Topic::Customer(id) => write!(f, "customer:{}", id),
        }
    }
}

/// Identity attached to a session after a successful authenticate.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub subscriber_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub role: Role,
}

/// Bounded outbound queue with drop-oldest overflow.
pub struct OutboundQueue {
    frames: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueues a frame without ever blocking the publisher. Returns the
    /// total drop count for this client.
    pub fn push(&self, frame: ServerMessage) -> u64 {
        {
            let mut frames = self.frames.lock().expect("outbound queue poisoned");
            if frames.len() >= self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("cargotrack_hub_frames_dropped_total").increment(1);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes everything currently queued, in order.
    pub fn drain(&self) -> Vec<ServerMessage> {
        let mut frames = self.frames.lock().expect("outbound queue poisoned");
        frames.drain(..).collect()
    }

    /// Parks until new frames arrive or the queue closes.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Per-session client state held by the hub.
pub struct ClientState {
    pub id: Uuid,
    pub queue: OutboundQueue,
    identity: RwLock<Option<SessionIdentity>>,
}

impl ClientState {
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.read().expect("identity lock poisoned").clone()
    }

    pub fn set_identity(&self, identity: SessionIdentity) {
        *self.identity.write().expect("identity lock poisoned") = Some(identity);
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().expect("identity lock poisoned").is_some()
    }
}

/// The broker. Safe under concurrent publish and subscribe.
pub struct TrackingHub {
    clients: DashMap<Uuid, Arc<ClientState>>,
    topics: RwLock<HashMap<Topic, HashSet<Uuid>>>,
    queue_capacity: usize,
    overflow_disconnect_after: u64,
}

impl TrackingHub {
    pub fn new(queue_capacity: usize, overflow_disconnect_after: u64) -> Self {
        Self {
            clients: DashMap::new(),
            topics: RwLock::new(HashMap::new()),
            queue_capacity,
            overflow_disconnect_after,
        }
    }

    /// Allocates state for a newly connected session.
    pub fn connect(&self) -> Arc<ClientState> {
        let client = Arc::new(ClientState {
            id: Uuid::new_v4(),
            queue: OutboundQueue::new(self.queue_capacity),
            identity: RwLock::new(None),
        });
        self.clients.insert(client.id, client.clone());
        counter!("cargotrack_hub_connects_total").increment(1);
        debug!(client_id = %client.id, "hub client connected");
        client
    }

    /// Removes a session from every topic and closes its queue.
    pub fn disconnect(&self, client_id: Uuid) {
        if let Some((_, client)) = self.clients.remove(&client_id) {
            client.queue.close();
        }
        let mut topics = self.topics.write().expect("topic table poisoned");
        topics.retain(|_, members| {
            members.remove(&client_id);
            !members.is_empty()
        });
        debug!(%client_id, "hub client disconnected");
    }

    pub fn join(&self, client_id: Uuid, topic: Topic) {
        let mut topics = self.topics.write().expect("topic table poisoned");
        topics.entry(topic).or_default().insert(client_id);
    }

    pub fn leave(&self, client_id: Uuid, topic: &Topic) {
        let mut topics = self.topics.write().expect("topic table poisoned");
        if let Some(members) = topics.get_mut(topic) {
            members.remove(&client_id);
            if members.is_empty() {
                topics.remove(topic);
            }
        }
    }

    pub fn client(&self, client_id: Uuid) -> Option<Arc<ClientState>> {
        self.clients.get(&client_id).map(|c| c.clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Fans a committed event out to both topic families. Never blocks;
    /// clients that overflow repeatedly are disconnected.
    pub fn publish(&self, bus_event: &BusEvent) {
        let event = &bus_event.event;
        let snapshot = &bus_event.snapshot;

        let shipment_frame = ServerMessage::TrackingEvent {
            shipment_id: bus_event.shipment_id,
            awb: bus_event.awb_number.clone(),
            event: event.clone(),
            shipment_snapshot: snapshot.clone(),
        };
        let customer_frame = ServerMessage::CustomerTrackingUpdate {
            customer_id: bus_event.customer_id,
            shipment_update: snapshot.clone(),
        };
        let critical_frame = event
            .is_noteworthy()
            .then(|| ServerMessage::critical_for(event, snapshot, &bus_event.awb_number));

        self.publish_to(
            &Topic::Shipment(bus_event.shipment_id),
            &shipment_frame,
            critical_frame.as_ref(),
        );
        self.publish_to(
            &Topic::Customer(bus_event.customer_id),
            &customer_frame,
            critical_frame.as_ref(),
        );
        counter!("cargotrack_hub_events_published_total").increment(1);
    }

    fn publish_to(&self, topic: &Topic, frame: &ServerMessage, critical: Option<&ServerMessage>) {
        let members: Vec<Uuid> = {
            let topics = self.topics.read().expect("topic table poisoned");
            match topics.get(topic) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let mut overflowed = Vec::new();
        for client_id in members {
            let Some(client) = self.client(client_id) else {
                continue;
            };
            let mut drops = client.queue.push(frame.clone());
            if let Some(critical) = critical {
                drops = client.queue.push(critical.clone());
            }
            if drops >= self.overflow_disconnect_after {
                overflowed.push(client_id);
            }
        }

        for client_id in overflowed {
            warn!(%client_id, "client queue overflowed repeatedly, disconnecting");
            self.disconnect(client_id);
        }
    }

    /// Best-effort broadcast used on graceful shutdown.
    pub fn broadcast_shutdown(&self, reason: &str) {
        let frame = ServerMessage::ServiceShutdown {
            reason: reason.to_string(),
            server_time: Utc::now(),
        };
        for entry in self.clients.iter() {
            entry.value().queue.push(frame.clone());
        }
        info!(clients = self.clients.len(), "shutdown broadcast sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::shipment::ShipmentStatus;
    use crate::entities::tracking_event::{EventCategory, EventSeverity};
    use crate::events::ShipmentSnapshot;

    fn bus_event(shipment_id: Uuid, customer_id: Uuid, milestone: bool) -> BusEvent {
        let event = crate::entities::tracking_event::Model {
            id: Uuid::new_v4(),
            shipment_id,
            event_code: "FLIGHT_ARRIVED".into(),
            description: "Flight arrived".into(),
            category: EventCategory::Milestone,
            location_name: None,
            location_country: None,
            location_city: None,
            airport_code: Some("HKG".into()),
            event_datetime: Utc::now(),
            event_timezone: None,
            is_milestone: milestone,
            is_exception: false,
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
        };
        BusEvent {
            shipment_id,
            customer_id,
            awb_number: "125-12345678".into(),
            snapshot: ShipmentSnapshot {
                shipment_id,
                awb_number: "125-12345678".into(),
                current_status: ShipmentStatus::Arrived,
                current_location: Some("HKG".into()),
                origin_airport: "SIN".into(),
                destination_airport: "HKG".into(),
                estimated_delivery_date: None,
                delivery_date: None,
                last_tracked_at: None,
            },
            event,
        }
    }

    #[test]
    fn fan_out_reaches_both_topic_families() {
        let hub = TrackingHub::new(16, 8);
        let shipment_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();

        let a = hub.connect();
        let b = hub.connect();
        hub.join(a.id, Topic::Shipment(shipment_id));
        hub.join(b.id, Topic::Customer(customer_id));

        hub.publish(&bus_event(shipment_id, customer_id, true));

        let a_frames = a.queue.drain();
        let b_frames = b.queue.drain();
        // Milestone: normal frame plus the critical companion on each topic.
        assert_eq!(a_frames.len(), 2);
        assert!(matches!(a_frames[0], ServerMessage::TrackingEvent { .. }));
        assert!(matches!(a_frames[1], ServerMessage::CriticalUpdate { .. }));
        assert_eq!(b_frames.len(), 2);
        assert!(matches!(
            b_frames[0],
            ServerMessage::CustomerTrackingUpdate { .. }
        ));
        assert!(matches!(b_frames[1], ServerMessage::CriticalUpdate { .. }));
    }

    #[test]
    fn non_milestone_event_has_no_critical_frame() {
        let hub = TrackingHub::new(16, 8);
        let shipment_id = Uuid::new_v4();
        let a = hub.connect();
        hub.join(a.id, Topic::Shipment(shipment_id));

        hub.publish(&bus_event(shipment_id, Uuid::new_v4(), false));
        assert_eq!(a.queue.drain().len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let queue = OutboundQueue::new(2);
        let ping = |n: u32| ServerMessage::SystemNotification {
            message: format!("m{}", n),
            level: "info".into(),
            server_time: Utc::now(),
        };
        queue.push(ping(1));
        queue.push(ping(2));
        queue.push(ping(3));
        assert_eq!(queue.dropped(), 1);
        let frames = queue.drain();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            ServerMessage::SystemNotification { message, .. } => assert_eq!(message, "m2"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn repeated_overflow_disconnects_client() {
        let hub = TrackingHub::new(1, 2);
        let shipment_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let a = hub.connect();
        hub.join(a.id, Topic::Shipment(shipment_id));

        // Capacity 1 with a milestone event pushes two frames per publish,
        // so drops accumulate fast.
        hub.publish(&bus_event(shipment_id, customer_id, true));
        hub.publish(&bus_event(shipment_id, customer_id, true));

        assert!(hub.client(a.id).is_none());
        assert!(a.queue.is_closed());
    }

    #[test]
    fn disconnect_prunes_topics() {
        let hub = TrackingHub::new(4, 8);
        let shipment_id = Uuid::new_v4();
        let a = hub.connect();
        hub.join(a.id, Topic::Shipment(shipment_id));
        hub.disconnect(a.id);

        hub.publish(&bus_event(shipment_id, Uuid::new_v4(), false));
        assert_eq!(a.queue.drain().len(), 0);
    }
}
