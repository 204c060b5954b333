use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::stream::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::entities::shipment;
use crate::events::ShipmentSnapshot;
use crate::stores::EventFilter;
use crate::AppState;

use super::{ClientMessage, ClientState, ServerMessage, SessionIdentity, Topic};

/// `GET /tracking/ws` — upgrades to the bidirectional push session.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Drives one client session: registers with the hub, sends the welcome
/// frame, then runs the read loop while a spawned writer drains the
/// client's outbound queue.
async fn handle_session(socket: WebSocket, state: AppState) {
    let client = state.hub.connect();
    let client_id = client.id;

    client.queue.push(ServerMessage::Connected {
        session_id: client_id,
        capabilities: vec![
            "shipment_subscriptions".to_string(),
            "customer_subscriptions".to_string(),
            "critical_updates".to_string(),
        ],
        server_time: Utc::now(),
    });

    let (sender, mut receiver) = socket.split();
    let writer = tokio::spawn(drain_outbound(client.clone(), sender));

    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&message) {
            Ok(inbound) => handle_client_message(&state, &client, inbound).await,
            Err(e) => {
                debug!(%client_id, error = %e, "unparseable client frame");
                client.queue.push(ServerMessage::SubscriptionError {
                    reason: "unrecognized message".to_string(),
                });
            }
        }

        if client.queue.is_closed() {
            break;
        }
    }

    // Client disconnect cancels the outbound drain and drops all topic
    // membership.
    state.hub.disconnect(client_id);
    writer.abort();
    let _ = writer.await;
    debug!(%client_id, "session ended");
}

async fn drain_outbound(
    client: Arc<ClientState>,
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
) {
    use futures::SinkExt;

    loop {
        for frame in client.queue.drain() {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "outbound frame serialization failed");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                client.queue.close();
                return;
            }
        }
        if client.queue.is_closed() {
            return;
        }
        client.queue.wait().await;
    }
}

async fn handle_client_message(state: &AppState, client: &Arc<ClientState>, inbound: ClientMessage) {
    match inbound {
        ClientMessage::Authenticate { token } => match state.auth.verify(&token) {
            Ok(claims) => {
                let subscriber_id = claims.sub;
                client.set_identity(SessionIdentity {
                    subscriber_id: claims.sub,
                    customer_id: claims.customer_id,
                    role: claims.role,
                });
                client.queue.push(ServerMessage::Authenticated { subscriber_id });
            }
            Err(e) => {
                client.queue.push(ServerMessage::AuthError {
                    reason: e.to_string(),
                });
            }
        },

        ClientMessage::SubscribeShipment { shipment_id, awb } => {
            subscribe_shipment(state, client, shipment_id, awb).await;
        }

        ClientMessage::UnsubscribeShipment { shipment_id } => {
            state.hub.leave(client.id, &Topic::Shipment(shipment_id));
        }

        ClientMessage::SubscribeCustomer { customer_id } => {
            let Some(identity) = client.identity() else {
                client.queue.push(ServerMessage::SubscriptionError {
                    reason: "authenticate first".to_string(),
                });
                return;
            };
            // Self only, unless staff.
            if identity.role < Role::Operator && identity.customer_id != Some(customer_id) {
                client.queue.push(ServerMessage::SubscriptionError {
                    reason: "cannot subscribe to another customer".to_string(),
                });
                return;
            }
            let topic = Topic::Customer(customer_id);
            state.hub.join(client.id, topic.clone());
            client.queue.push(ServerMessage::SubscribedCustomer {
                customer_id,
                topic: topic.to_string(),
            });
        }

        ClientMessage::Ping {} => {
            client.queue.push(ServerMessage::Pong {
                server_time: Utc::now(),
            });
        }
    }
}

async fn subscribe_shipment(
    state: &AppState,
    client: &Arc<ClientState>,
    shipment_id: Option<Uuid>,
    awb: Option<String>,
) {
    let Some(identity) = client.identity() else {
        client.queue.push(ServerMessage::SubscriptionError {
            reason: "authenticate first".to_string(),
        });
        return;
    };

    let lookup = match (shipment_id, awb) {
        (Some(id), _) => state.shipments.by_id(id).await,
        (None, Some(awb)) => state.shipments.by_awb(&awb).await,
        (None, None) => {
            client.queue.push(ServerMessage::SubscriptionError {
                reason: "shipment_id or awb required".to_string(),
            });
            return;
        }
    };

    let shipment = match lookup {
        Ok(Some(shipment)) => shipment,
        Ok(None) => {
            client.queue.push(ServerMessage::SubscriptionError {
                reason: "shipment not found".to_string(),
            });
            return;
        }
        Err(e) => {
            warn!(error = %e, "shipment lookup failed during subscribe");
            client.queue.push(ServerMessage::SubscriptionError {
                reason: "lookup failed".to_string(),
            });
            return;
        }
    };

    // Customer-scoped sessions may only watch their own shipments.
    if identity.role < Role::Operator && identity.customer_id != Some(shipment.customer_id) {
        client.queue.push(ServerMessage::SubscriptionError {
            reason: "shipment belongs to another customer".to_string(),
        });
        return;
    }

    let topic = Topic::Shipment(shipment.id);
    state.hub.join(client.id, topic.clone());

    send_snapshot(state, client, &shipment, &topic).await;
}

/// Initial snapshot on subscribe: current derived state plus recent events.
async fn send_snapshot(
    state: &AppState,
    client: &Arc<ClientState>,
    shipment: &shipment::Model,
    topic: &Topic,
) {
    client.queue.push(ServerMessage::Subscribed {
        shipment_id: shipment.id,
        topic: topic.to_string(),
        snapshot: ShipmentSnapshot::from(shipment),
    });

    match state
        .events
        .events_for_shipment(
            shipment.id,
            &EventFilter::recent(state.config.hub.snapshot_recent_events),
        )
        .await
    {
        Ok(events) if !events.is_empty() => {
            client.queue.push(ServerMessage::BulkTrackingUpdate {
                shipment_id: shipment.id,
                events,
            });
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "snapshot event load failed"),
    }
}
