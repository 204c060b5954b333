mod common;

use common::{canonical, TestApp};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use cargotrack_api::auth::Role;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn public_tracking_by_awb() {
    let app = TestApp::new().await;
    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let source = app.manual_source_id().await;
    app.state
        .pipeline
        .apply(
            shipment.id,
            canonical(&app, "CARGO_COLLECTED", "2025-08-05T10:00:00Z", Some("SIN")),
            source,
        )
        .await
        .unwrap();

    let (status, body) = send(&app, Method::GET, "/tracking/awb/125-12345678", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_status"], "BOOKED");
    assert_eq!(body["current_location"], "SIN");
    assert_eq!(body["has_exceptions"], false);
    assert_eq!(body["recent_events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn public_tracking_validates_awb_format() {
    let app = TestApp::new().await;
    for bad in ["12-12345678", "125-1234567", "abc-12345678", "12512345678"] {
        let (status, _) = send(
            &app,
            Method::GET,
            &format!("/tracking/awb/{}", bad),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "awb {}", bad);
    }

    let (status, _) = send(&app, Method::GET, "/tracking/awb/999-00000000", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn customer_cannot_read_foreign_shipments() {
    // Property 7: access isolation over every authed endpoint.
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let shipment = app.create_shipment("125-12345678", owner).await;

    let stranger_token = app.token(Role::Customer, Uuid::new_v4(), Some(stranger));
    let uris = [
        format!("/tracking/shipments/{}", shipment.id),
        format!("/tracking/shipments/{}/events", shipment.id),
        format!("/tracking/customer/{}/history", owner),
    ];
    for uri in &uris {
        let (status, _) = send(&app, Method::GET, uri, Some(&stranger_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "uri {}", uri);
    }

    let owner_token = app.token(Role::Customer, Uuid::new_v4(), Some(owner));
    for uri in &uris {
        let (status, _) = send(&app, Method::GET, uri, Some(&owner_token), None).await;
        assert_eq!(status, StatusCode::OK, "uri {}", uri);
    }
}

#[tokio::test]
async fn unauthenticated_requests_are_refused() {
    let app = TestApp::new().await;
    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/tracking/shipments/{}", shipment.id),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn manual_event_endpoint_applies_and_conflicts() {
    let app = TestApp::new().await;
    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let operator = app.token(Role::Operator, Uuid::new_v4(), None);

    let payload = json!({
        "shipment_id": shipment.id,
        "event_code": "FLIGHT_DEPARTED",
        "description": "Departed on SQ368",
        "event_datetime": "2025-08-05T14:00:00Z",
        "airport_code": "SIN",
    });

    let (status, body) = send(
        &app,
        Method::POST,
        "/tracking/events",
        Some(&operator),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["event"]["event_code"], "FLIGHT_DEPARTED");

    // Re-posting the same logical event lands in the dedup window.
    let (status, _) = send(
        &app,
        Method::POST,
        "/tracking/events",
        Some(&operator),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn manual_event_requires_operator_role() {
    let app = TestApp::new().await;
    let shipment = app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let customer = app.token(Role::Customer, Uuid::new_v4(), Some(Uuid::new_v4()));

    let (status, _) = send(
        &app,
        Method::POST,
        "/tracking/events",
        Some(&customer),
        Some(json!({
            "shipment_id": shipment.id,
            "event_code": "DELIVERED",
            "description": "self-service delivery",
            "event_datetime": "2025-08-07T12:00:00Z",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn manual_event_unknown_shipment_is_404() {
    let app = TestApp::new().await;
    let operator = app.token(Role::Operator, Uuid::new_v4(), None);

    let (status, _) = send(
        &app,
        Method::POST,
        "/tracking/events",
        Some(&operator),
        Some(json!({
            "shipment_id": Uuid::new_v4(),
            "event_code": "FLIGHT_DEPARTED",
            "description": "Departed",
            "event_datetime": "2025-08-05T14:00:00Z",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_endpoint_enforces_ownership() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let shipment = app.create_shipment("125-12345678", owner).await;

    let stranger = app.token(Role::Customer, Uuid::new_v4(), Some(Uuid::new_v4()));
    let payload = json!({
        "shipment_id": shipment.id,
        "method": "EMAIL",
        "endpoint": "me@example.com",
        "on_milestone": true,
    });
    let (status, _) = send(
        &app,
        Method::POST,
        "/tracking/subscribe",
        Some(&stranger),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let owner_token = app.token(Role::Customer, Uuid::new_v4(), Some(owner));
    let (status, body) = send(
        &app,
        Method::POST,
        "/tracking/subscribe",
        Some(&owner_token),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["subscription"]["on_milestone"], true);
}

#[tokio::test]
async fn statistics_requires_admin_and_valid_range() {
    let app = TestApp::new().await;
    let operator = app.token(Role::Operator, Uuid::new_v4(), None);
    let admin = app.token(Role::Admin, Uuid::new_v4(), None);

    let uri = "/tracking/statistics?date_from=2025-08-01T00:00:00Z&date_to=2025-08-31T00:00:00Z";
    let (status, _) = send(&app, Method::GET, uri, Some(&operator), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, Method::GET, uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["statistics"]["total_events"].is_number());

    let backwards =
        "/tracking/statistics?date_from=2025-08-31T00:00:00Z&date_to=2025-08-01T00:00:00Z";
    let (status, _) = send(&app, Method::GET, backwards, Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn process_updates_runs_a_tick() {
    let app = TestApp::new().await;
    app.create_shipment("125-12345678", Uuid::new_v4()).await;
    let admin = app.token(Role::Admin, Uuid::new_v4(), None);

    let (status, body) = send(
        &app,
        Method::POST,
        "/tracking/process-updates",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The stub adapters return no events, but the shipment was selected.
    assert_eq!(body["selected"], 1);
    assert_eq!(body["events_created"], 0);
}

#[tokio::test]
async fn bulk_update_validates_batch_size() {
    let app = TestApp::new().await;
    let operator = app.token(Role::Operator, Uuid::new_v4(), None);

    let too_many: Vec<String> = (0..101).map(|i| format!("125-{:08}", i)).collect();
    let (status, _) = send(
        &app,
        Method::POST,
        "/tracking/bulk-update",
        Some(&operator),
        Some(json!({ "awb_numbers": too_many })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/tracking/bulk-update",
        Some(&operator),
        Some(json!({ "awb_numbers": ["125-00000001"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["error"], "not found");
}

#[tokio::test]
async fn events_endpoint_filters_and_validates() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let shipment = app.create_shipment("125-12345678", owner).await;
    let source = app.manual_source_id().await;
    for (code, at) in [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z"),
    ] {
        app.state
            .pipeline
            .apply(shipment.id, canonical(&app, code, at, Some("SIN")), source)
            .await
            .unwrap();
    }

    let token = app.token(Role::Customer, Uuid::new_v4(), Some(owner));
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/tracking/shipments/{}/events?milestones_only=true", shipment.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 2);

    // Pagination bound: events accept up to 1000.
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/tracking/shipments/{}/events?limit=1001", shipment.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Reversed date range is rejected.
    let (status, _) = send(
        &app,
        Method::GET,
        &format!(
            "/tracking/shipments/{}/events?date_from=2025-08-10T00:00:00Z&date_to=2025-08-01T00:00:00Z",
            shipment.id
        ),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoint_reports_up() {
    let app = TestApp::new().await;
    let (status, body) = send(&app, Method::GET, "/tracking/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
}
