pub mod health;
pub mod tracking;

use axum::{middleware, routing::get, routing::post, Router};

use crate::hub::session::ws_handler;
use crate::rate_limiter::public_rate_limit;
use crate::AppState;

/// Full tracking route table, mounted under `/tracking`.
pub fn tracking_routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/awb/{awb}", get(tracking::public_tracking))
        .route_layer(middleware::from_fn_with_state(state, public_rate_limit));

    Router::new()
        .merge(public)
        .route("/shipments/{id}", get(tracking::shipment_detail))
        .route("/shipments/{id}/events", get(tracking::shipment_events))
        .route("/customer/{id}/history", get(tracking::customer_history))
        .route("/events", post(tracking::manual_event))
        .route("/update/{awb}", post(tracking::force_refresh))
        .route("/bulk-update", post(tracking::bulk_refresh))
        .route("/subscribe", post(tracking::create_subscription))
        .route("/statistics", get(tracking::statistics))
        .route("/process-updates", post(tracking::process_updates))
        .route("/health", get(health::health_check))
        .route("/ws", get(ws_handler))
}
