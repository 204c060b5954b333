mod common;

use common::{canonical, TestApp};

use cargotrack_api::hub::{ServerMessage, Topic};
use std::time::Duration;
use uuid::Uuid;

async fn settle() {
    // Let the fan-out loop drain the bus.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn fan_out_to_shipment_and_customer_subscribers() {
    // S4: client A on the shipment topic and client B on the customer
    // topic both see the event; a milestone also carries the critical
    // companion frame.
    let mut app = TestApp::new().await;
    app.start_fanout();

    let customer = Uuid::new_v4();
    let shipment = app.create_shipment("125-12345678", customer).await;
    let source = app.manual_source_id().await;

    let client_a = app.state.hub.connect();
    let client_b = app.state.hub.connect();
    app.state.hub.join(client_a.id, Topic::Shipment(shipment.id));
    app.state.hub.join(client_b.id, Topic::Customer(customer));

    app.state
        .pipeline
        .apply(
            shipment.id,
            canonical(&app, "FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", Some("HKG")),
            source,
        )
        .await
        .unwrap();
    settle().await;

    let a_frames = client_a.queue.drain();
    assert_eq!(a_frames.len(), 2);
    match &a_frames[0] {
        ServerMessage::TrackingEvent { awb, event, .. } => {
            assert_eq!(awb, "125-12345678");
            assert_eq!(event.event_code, "FLIGHT_ARRIVED");
        }
        other => panic!("expected tracking_event, got {:?}", other),
    }
    assert!(matches!(a_frames[1], ServerMessage::CriticalUpdate { .. }));

    let b_frames = client_b.queue.drain();
    assert_eq!(b_frames.len(), 2);
    match &b_frames[0] {
        ServerMessage::CustomerTrackingUpdate { customer_id, shipment_update } => {
            assert_eq!(*customer_id, customer);
            assert_eq!(shipment_update.shipment_id, shipment.id);
        }
        other => panic!("expected customer_tracking_update, got {:?}", other),
    }
    assert!(matches!(b_frames[1], ServerMessage::CriticalUpdate { .. }));
}

#[tokio::test]
async fn unsubscribed_clients_see_nothing() {
    let mut app = TestApp::new().await;
    app.start_fanout();

    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let other_shipment = app.create_shipment("125-99999999", Uuid::new_v4()).await;
    let source = app.manual_source_id().await;

    let client = app.state.hub.connect();
    app.state
        .hub
        .join(client.id, Topic::Shipment(other_shipment.id));

    app.state
        .pipeline
        .apply(
            shipment.id,
            canonical(&app, "FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", Some("SIN")),
            source,
        )
        .await
        .unwrap();
    settle().await;

    assert!(client.queue.drain().is_empty());
}

#[tokio::test]
async fn per_topic_order_matches_publish_order() {
    let mut app = TestApp::new().await;
    app.start_fanout();

    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let source = app.manual_source_id().await;
    let client = app.state.hub.connect();
    app.state.hub.join(client.id, Topic::Shipment(shipment.id));

    let sequence = [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z"),
        ("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z"),
    ];
    for (code, at) in sequence {
        app.state
            .pipeline
            .apply(shipment.id, canonical(&app, code, at, Some("SIN")), source)
            .await
            .unwrap();
    }
    settle().await;

    let codes: Vec<String> = client
        .queue
        .drain()
        .into_iter()
        .filter_map(|frame| match frame {
            ServerMessage::TrackingEvent { event, .. } => Some(event.event_code),
            _ => None,
        })
        .collect();
    assert_eq!(codes, ["CARGO_COLLECTED", "FLIGHT_DEPARTED", "FLIGHT_ARRIVED"]);
}

#[tokio::test]
async fn snapshot_on_frames_reflects_derived_state() {
    let mut app = TestApp::new().await;
    app.start_fanout();

    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let source = app.manual_source_id().await;
    let client = app.state.hub.connect();
    app.state.hub.join(client.id, Topic::Shipment(shipment.id));

    app.state
        .pipeline
        .apply(
            shipment.id,
            canonical(&app, "DELIVERED", "2025-08-07T12:00:00Z", Some("HKG")),
            source,
        )
        .await
        .unwrap();
    settle().await;

    let frames = client.queue.drain();
    match &frames[0] {
        ServerMessage::TrackingEvent { shipment_snapshot, .. } => {
            assert_eq!(
                shipment_snapshot.current_status,
                cargotrack_api::entities::shipment::ShipmentStatus::Delivered
            );
            assert!(shipment_snapshot.delivery_date.is_some());
        }
        other => panic!("expected tracking_event, got {:?}", other),
    }
}
