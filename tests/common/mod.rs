//! Shared harness: an application state backed by an in-memory SQLite
//! database with seeded reference data.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sea_orm::Set;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use cargotrack_api::{
    adapters::{CanonicalEvent, CarrierAdapter, CustomsAdapter, ManualAdapter, SourceAdapter},
    auth::{AuthService, Claims, Role},
    cache::SnapshotCache,
    catalog::{seed_reference_data, MilestoneCatalog},
    config::AppConfig,
    db,
    entities::shipment::{self, ShipmentStatus},
    entities::tracking_event::{EventCategory, EventSeverity},
    events::{process_events, BusEvent, EventSender},
    handlers,
    hub::TrackingHub,
    ingestion::TrackingPipeline,
    notifications::{DeliveryMethod, NotificationDispatcher, NotificationQueue},
    rate_limiter::RateLimiter,
    scheduler::PollScheduler,
    stores::{EventStore, ShipmentStore, SubscriptionStore},
    AppState,
};

pub const TEST_SECRET: &str = "test_secret_key_for_testing_only_32c";

/// Test application with a fresh in-memory database.
pub struct TestApp {
    pub state: AppState,
    pub bus_rx: Option<mpsc::Receiver<BusEvent>>,
    pub notification_queue: NotificationQueue,
    pub job_rx: Option<mpsc::Receiver<cargotrack_api::notifications::NotificationJob>>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18080,
        );
        // Fast retries in tests.
        config.notifications.initial_backoff_secs = 0;
        config.notifications.max_backoff_secs = 0;

        let db = db::establish_connection(&config.database_url)
            .await
            .expect("test database");
        db::ensure_schema(&db).await.expect("schema bootstrap");
        seed_reference_data(&db).await.expect("reference data");

        let catalog = Arc::new(MilestoneCatalog::load(&db).await.expect("catalog"));

        let shipments = ShipmentStore::new(db.clone());
        let events = EventStore::new(db.clone());
        let subscriptions = SubscriptionStore::new(db.clone());

        let (bus_tx, bus_rx) = mpsc::channel(256);
        let pipeline = TrackingPipeline::new(
            db.clone(),
            events.clone(),
            shipments.clone(),
            EventSender::new(bus_tx),
        );

        let hub = Arc::new(TrackingHub::new(
            config.hub.client_queue_capacity,
            config.hub.overflow_disconnect_after,
        ));

        let (job_tx, job_rx) = mpsc::channel(256);
        let notification_queue = NotificationQueue::new(job_tx);

        let manual_adapter = Arc::new(ManualAdapter::new(catalog.clone()));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(CarrierAdapter),
            Arc::new(CustomsAdapter),
            manual_adapter.clone(),
        ];
        let scheduler = Arc::new(PollScheduler::new(
            db.clone(),
            shipments.clone(),
            pipeline.clone(),
            adapters,
            config.scheduler.clone(),
        ));

        let state = AppState {
            db,
            config: config.clone(),
            auth: AuthService::new(TEST_SECRET),
            shipments,
            events,
            subscriptions,
            pipeline,
            hub,
            scheduler,
            manual_adapter,
            catalog,
            snapshot_cache: Arc::new(SnapshotCache::new(config.snapshot_cache_ttl_secs)),
            rate_limiter: Arc::new(RateLimiter::new(1000, Duration::from_secs(60))),
        };

        Self {
            state,
            bus_rx: Some(bus_rx),
            notification_queue,
            job_rx: Some(job_rx),
        }
    }

    /// Router with the full tracking surface, for handler-level tests.
    pub fn router(&self) -> Router {
        Router::new()
            .nest("/tracking", handlers::tracking_routes(self.state.clone()))
            .with_state(self.state.clone())
    }

    /// Spawns the bus fan-out loop so pipeline applies reach the hub and
    /// the notification queue.
    pub fn start_fanout(&mut self) {
        let bus_rx = self.bus_rx.take().expect("fan-out already started");
        tokio::spawn(process_events(
            bus_rx,
            self.state.hub.clone(),
            self.state.subscriptions.clone(),
            self.notification_queue.clone(),
        ));
    }

    /// Spawns a dispatcher over the given delivery methods. Returns the
    /// shutdown sender.
    pub fn start_dispatcher(
        &mut self,
        methods: Vec<Arc<dyn DeliveryMethod>>,
    ) -> (Arc<NotificationDispatcher>, watch::Sender<bool>) {
        let job_rx = self.job_rx.take().expect("dispatcher already started");
        let dispatcher = Arc::new(NotificationDispatcher::new(
            self.state.db.clone(),
            self.state.events.clone(),
            self.state.subscriptions.clone(),
            methods,
            self.state.config.notifications.clone(),
            self.notification_queue.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher.clone().run(job_rx, shutdown_rx));
        (dispatcher, shutdown_tx)
    }

    pub fn token(&self, role: Role, subscriber_id: Uuid, customer_id: Option<Uuid>) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subscriber_id,
            customer_id,
            role,
            exp: now + 3600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token")
    }

    /// Seeds a shipment in the S1 shape.
    pub async fn create_shipment(&self, awb: &str, customer_id: Uuid) -> shipment::Model {
        let now = Utc::now();
        self.state
            .shipments
            .create(shipment::ActiveModel {
                id: Set(Uuid::new_v4()),
                awb_number: Set(awb.to_string()),
                customer_id: Set(customer_id),
                origin_airport: Set("SIN".to_string()),
                destination_airport: Set("HKG".to_string()),
                route: Set(None),
                flight_number: Set(Some("SQ368".to_string())),
                flight_date: Set(None),
                pieces: Set(2),
                weight_kg: Set(Decimal::new(105, 1)),
                volume_cbm: Set(None),
                commodity_description: Set(Some("Electronics".to_string())),
                declared_value: Set(None),
                declared_value_currency: Set(None),
                current_status: Set(ShipmentStatus::Created),
                current_location: Set(None),
                pickup_date: Set(None),
                delivery_date: Set(None),
                estimated_delivery_date: Set(None),
                tracking_enabled: Set(true),
                tracking_frequency_minutes: Set(30),
                last_tracked_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .await
            .expect("create shipment")
    }

    pub async fn manual_source_id(&self) -> i32 {
        self.state
            .source_id(cargotrack_api::entities::tracking_source::SourceType::Manual)
            .await
            .expect("manual source")
    }

    pub async fn feed_source_id(&self) -> i32 {
        self.state
            .source_id(cargotrack_api::entities::tracking_source::SourceType::IndustryFeed)
            .await
            .expect("feed source")
    }
}

/// Canonical event in the shape the manual adapter produces, with the
/// classification the catalog dictates.
pub fn canonical(app: &TestApp, code: &str, at: &str, airport: Option<&str>) -> CanonicalEvent {
    let at: DateTime<Utc> = at.parse().expect("timestamp");
    let is_milestone = app.state.catalog.is_milestone(code);
    let mut event = CanonicalEvent::new(code, format!("{} event", code), at);
    event.airport_code = airport.map(|s| s.to_string());
    event.is_milestone = is_milestone;
    event.is_critical = app.state.catalog.is_critical(code);
    if is_milestone {
        event.category = EventCategory::Milestone;
    }
    event
}

/// A location ping: no status mapping, LOCATION_UPDATE category.
pub fn location_ping(at: &str, airport: &str) -> CanonicalEvent {
    let at: DateTime<Utc> = at.parse().expect("timestamp");
    let mut event = CanonicalEvent::new("LOCATION_UPDATE", "position update", at);
    event.category = EventCategory::LocationUpdate;
    event.airport_code = Some(airport.to_string());
    event.severity = EventSeverity::Info;
    event
}
