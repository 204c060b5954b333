use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::adapters::manual::ManualEventInput;
use crate::auth::{AuthenticatedUser, Role};
use crate::entities::shipment;
use crate::entities::tracking_event::{self, EventCategory};
use crate::entities::tracking_source::SourceType;
use crate::entities::tracking_subscription::DeliveryMethodKind;
use crate::errors::ServiceError;
use crate::events::ShipmentSnapshot;
use crate::ingestion::{ApplyOutcome, RejectReason};
use crate::stores::subscription_store::NewSubscription;
use crate::stores::EventFilter;
use crate::AppState;

lazy_static! {
    static ref AWB_FORMAT: Regex = Regex::new(r"^[0-9]{3}-[0-9]{8}$").expect("valid AWB regex");
}

const MAX_BULK_REFRESH: usize = 100;
const MAX_EVENT_PAGE: u64 = 1000;
const MAX_PAGE: u64 = 100;

fn validate_awb(awb: &str) -> Result<(), ServiceError> {
    if AWB_FORMAT.is_match(awb) {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "invalid AWB format: {}",
            awb
        )))
    }
}

fn clamp_page(limit: Option<u64>, offset: Option<u64>, max: u64) -> Result<(u64, u64), ServiceError> {
    let limit = limit.unwrap_or(20);
    if limit < 1 || limit > max {
        return Err(ServiceError::validation(format!(
            "limit must be between 1 and {}",
            max
        )));
    }
    Ok((limit, offset.unwrap_or(0)))
}

/// Event view trimmed for responses.
#[derive(Debug, Serialize)]
pub struct EventView {
    pub id: Uuid,
    pub event_code: String,
    pub description: String,
    pub category: EventCategory,
    pub location: Option<String>,
    pub event_datetime: DateTime<Utc>,
    pub is_milestone: bool,
    pub is_exception: bool,
    pub severity: crate::entities::tracking_event::EventSeverity,
}

impl From<&tracking_event::Model> for EventView {
    fn from(event: &tracking_event::Model) -> Self {
        Self {
            id: event.id,
            event_code: event.event_code.clone(),
            description: event.description.clone(),
            category: event.category,
            location: event.location_label(),
            event_datetime: event.event_datetime,
            is_milestone: event.is_milestone,
            is_exception: event.is_exception,
            severity: event.severity,
        }
    }
}

/// Best-available delivery estimate: the intake's figure, or flight date
/// plus the catalog's expected transit.
fn estimate_delivery(state: &AppState, shipment: &shipment::Model) -> Option<DateTime<Utc>> {
    shipment.estimated_delivery_date.or_else(|| {
        let transit = state.catalog.expected_transit()?;
        shipment.flight_date.map(|d| d + transit)
    })
}

/// `GET /tracking/awb/{awb}` — public snapshot, rate-limited and cached.
/// Serves the best persisted state even when the latest refresh failed.
pub async fn public_tracking(
    State(state): State<AppState>,
    Path(awb): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_awb(&awb)?;

    if let Some(cached) = state.snapshot_cache.get(&awb).await {
        return Ok(Json(cached));
    }

    let shipment = state
        .shipments
        .by_awb(&awb)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("no shipment for AWB {}", awb)))?;

    let events = state
        .events
        .events_for_shipment(
            shipment.id,
            &EventFilter {
                customer_visible_only: true,
                limit: 10,
                ..Default::default()
            },
        )
        .await?;
    let has_exceptions = state.events.has_exceptions(shipment.id).await?;

    let body = json!({
        "awb_number": shipment.awb_number,
        "current_status": shipment.current_status,
        "current_location": shipment.current_location,
        "origin_airport": shipment.origin_airport,
        "destination_airport": shipment.destination_airport,
        "estimated_delivery_date": estimate_delivery(&state, &shipment),
        "delivery_date": shipment.delivery_date,
        "has_exceptions": has_exceptions,
        "last_tracked_at": shipment.last_tracked_at,
        "recent_events": events.iter().map(EventView::from).collect::<Vec<_>>(),
    });

    state.snapshot_cache.put(awb, body.clone()).await;
    Ok(Json(body))
}

/// `GET /tracking/shipments/{id}` — authenticated full snapshot with
/// history.
pub async fn shipment_detail(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipment = state
        .shipments
        .by_id(id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("shipment {}", id)))?;
    caller.require_customer_access(shipment.customer_id)?;

    let events = state
        .events
        .events_for_shipment(shipment.id, &EventFilter::recent(50))
        .await?;
    let has_exceptions = state.events.has_exceptions(shipment.id).await?;

    Ok(Json(json!({
        "shipment": shipment,
        "snapshot": ShipmentSnapshot::from(&shipment),
        "estimated_delivery_date": estimate_delivery(&state, &shipment),
        "has_exceptions": has_exceptions,
        "events": events,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// `GET /tracking/customer/{id}/history` — self-scoped paginated list.
pub async fn customer_history(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(customer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_customer_access(customer_id)?;
    let (limit, offset) = clamp_page(query.limit, query.offset, MAX_PAGE)?;

    let (shipments, total) = state.shipments.owned_by(customer_id, limit, offset).await?;
    Ok(Json(json!({
        "customer_id": customer_id,
        "total": total,
        "limit": limit,
        "offset": offset,
        "shipments": shipments.iter().map(ShipmentSnapshot::from).collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub category: Option<EventCategory>,
    #[serde(default)]
    pub milestones_only: bool,
    #[serde(default)]
    pub exceptions_only: bool,
    #[serde(default)]
    pub customer_visible_only: bool,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// `GET /tracking/shipments/{id}/events` — filtered, paginated event log.
pub async fn shipment_events(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let shipment = state
        .shipments
        .by_id(id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("shipment {}", id)))?;
    caller.require_customer_access(shipment.customer_id)?;

    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        if from >= to {
            return Err(ServiceError::validation("date_from must precede date_to"));
        }
    }
    let (limit, offset) = clamp_page(query.limit, query.offset, MAX_EVENT_PAGE)?;

    let filter = EventFilter {
        category: query.category,
        milestones_only: query.milestones_only,
        exceptions_only: query.exceptions_only,
        customer_visible_only: query.customer_visible_only,
        date_from: query.date_from,
        date_to: query.date_to,
        limit,
        offset,
    };
    let events = state.events.events_for_shipment(shipment.id, &filter).await?;

    Ok(Json(json!({
        "shipment_id": shipment.id,
        "limit": limit,
        "offset": offset,
        "events": events,
    })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    pub shipment_id: Option<Uuid>,
    pub awb_number: Option<String>,
    #[validate(length(min = 2, max = 64))]
    pub event_code: String,
    #[validate(length(min = 1, max = 512))]
    pub description: String,
    pub event_datetime: DateTime<Utc>,
    pub location_name: Option<String>,
    pub airport_code: Option<String>,
    pub location_country: Option<String>,
    pub location_city: Option<String>,
    #[serde(default)]
    pub is_exception: bool,
    #[serde(default = "default_true")]
    pub customer_visible: bool,
    pub additional_info: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// `POST /tracking/events` — manual Apply, operator and above.
pub async fn manual_event(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(request): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_role(Role::Operator)?;
    request.validate()?;

    let shipment = match (request.shipment_id, request.awb_number.as_deref()) {
        (Some(id), _) => state.shipments.by_id(id).await?,
        (None, Some(awb)) => {
            validate_awb(awb)?;
            state.shipments.by_awb(awb).await?
        }
        (None, None) => {
            return Err(ServiceError::validation(
                "shipment_id or awb_number required",
            ))
        }
    }
    .ok_or_else(|| ServiceError::not_found("shipment not found"))?;

    let canonical = state.manual_adapter.build_event(ManualEventInput {
        event_code: request.event_code,
        description: request.description,
        event_datetime: request.event_datetime,
        location_name: request.location_name,
        airport_code: request.airport_code,
        location_country: request.location_country,
        location_city: request.location_city,
        is_exception: request.is_exception,
        customer_visible: request.customer_visible,
        additional_info: request.additional_info,
    });

    let source_id = state.source_id(SourceType::Manual).await?;
    match state.pipeline.apply(shipment.id, canonical, source_id).await? {
        ApplyOutcome::Created(event) => {
            state.snapshot_cache.invalidate(&shipment.awb_number).await;
            Ok((StatusCode::CREATED, Json(json!({ "event": event }))))
        }
        ApplyOutcome::Duplicate => Err(ServiceError::Duplicate(
            "event already applied within the dedup window".to_string(),
        )),
        ApplyOutcome::Rejected(RejectReason::ShipmentNotFound) => {
            Err(ServiceError::not_found("shipment not found"))
        }
        ApplyOutcome::Rejected(reason) => Err(ServiceError::validation(format!(
            "event rejected: {:?}",
            reason
        ))),
    }
}

/// `POST /tracking/update/{awb}` — force an adapter refresh.
pub async fn force_refresh(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Path(awb): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_role(Role::Operator)?;
    validate_awb(&awb)?;

    let shipment = state
        .shipments
        .by_awb(&awb)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("no shipment for AWB {}", awb)))?;

    let summary = state.scheduler.refresh_by_id(shipment.id).await?;
    state.snapshot_cache.invalidate(&awb).await;
    Ok(Json(json!({
        "awb_number": awb,
        "events_created": summary.events_created,
        "duplicates": summary.duplicates,
        "transient_failures": summary.transient_failures,
        "permanent_failures": summary.permanent_failures,
    })))
}

#[derive(Debug, Deserialize)]
pub struct BulkRefreshRequest {
    pub awb_numbers: Vec<String>,
}

/// `POST /tracking/bulk-update` — force refresh for up to 100 AWBs.
pub async fn bulk_refresh(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(request): Json<BulkRefreshRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_role(Role::Operator)?;
    if request.awb_numbers.is_empty() || request.awb_numbers.len() > MAX_BULK_REFRESH {
        return Err(ServiceError::validation(format!(
            "between 1 and {} AWB numbers per request",
            MAX_BULK_REFRESH
        )));
    }
    for awb in &request.awb_numbers {
        validate_awb(awb)?;
    }

    let mut results = Vec::with_capacity(request.awb_numbers.len());
    for awb in &request.awb_numbers {
        let outcome = match state.shipments.by_awb(awb).await? {
            Some(shipment) => match state.scheduler.refresh_by_id(shipment.id).await {
                Ok(summary) => json!({
                    "awb_number": awb,
                    "events_created": summary.events_created,
                }),
                Err(e) => json!({ "awb_number": awb, "error": e.to_string() }),
            },
            None => json!({ "awb_number": awb, "error": "not found" }),
        };
        results.push(outcome);
    }

    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    pub shipment_id: Option<Uuid>,
    pub awb_number: Option<String>,
    pub method: DeliveryMethodKind,
    #[validate(length(min = 1, max = 512))]
    pub endpoint: String,
    #[serde(default)]
    pub on_milestone: bool,
    #[serde(default)]
    pub on_exception: bool,
    #[serde(default)]
    pub on_location_update: bool,
    #[serde(default)]
    pub on_all_events: bool,
}

/// `POST /tracking/subscribe` — create or refresh a notification
/// subscription.
pub async fn create_subscription(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;

    let shipment = match (request.shipment_id, request.awb_number.as_deref()) {
        (Some(id), _) => state.shipments.by_id(id).await?,
        (None, Some(awb)) => {
            validate_awb(awb)?;
            state.shipments.by_awb(awb).await?
        }
        (None, None) => {
            return Err(ServiceError::validation(
                "shipment_id or awb_number required",
            ))
        }
    }
    .ok_or_else(|| ServiceError::not_found("shipment not found"))?;

    caller.require_customer_access(shipment.customer_id)?;

    if !(request.on_milestone
        || request.on_exception
        || request.on_location_update
        || request.on_all_events)
    {
        return Err(ServiceError::validation(
            "at least one event filter must be enabled",
        ));
    }

    let subscription = state
        .subscriptions
        .upsert(NewSubscription {
            shipment_id: shipment.id,
            subscriber_id: caller.subscriber_id,
            method: request.method,
            endpoint: request.endpoint,
            on_milestone: request.on_milestone,
            on_exception: request.on_exception,
            on_location_update: request.on_location_update,
            on_all_events: request.on_all_events,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "subscription": subscription }))))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

/// `GET /tracking/statistics` — admin stats over a date range.
pub async fn statistics(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
    Query(query): Query<StatisticsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_role(Role::Admin)?;
    if query.date_from >= query.date_to {
        return Err(ServiceError::validation("date_from must precede date_to"));
    }

    let stats = state.events.statistics(query.date_from, query.date_to).await?;
    Ok(Json(json!({
        "date_from": query.date_from,
        "date_to": query.date_to,
        "statistics": stats,
    })))
}

/// `POST /tracking/process-updates` — one-shot scheduler tick.
pub async fn process_updates(
    State(state): State<AppState>,
    caller: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_role(Role::Admin)?;
    let summary = state.scheduler.run_once().await?;
    Ok(Json(json!({
        "selected": summary.selected,
        "events_created": summary.events_created,
        "duplicates": summary.duplicates,
        "transient_failures": summary.transient_failures,
        "permanent_failures": summary.permanent_failures,
    })))
}
