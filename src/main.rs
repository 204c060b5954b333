use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cargotrack_api::{
    adapters::{
        CarrierAdapter, CustomsAdapter, IndustryFeedAdapter, ManualAdapter, SourceAdapter,
    },
    cache::SnapshotCache,
    catalog::{self, MilestoneCatalog},
    config, db,
    auth::AuthService,
    events::{process_events, EventSender},
    handlers,
    hub::TrackingHub,
    ingestion::TrackingPipeline,
    notifications::{
        EmailDelivery, NotificationDispatcher, NotificationQueue, PushDelivery, SmsDelivery,
        WebhookDelivery,
    },
    rate_limiter::RateLimiter,
    scheduler::PollScheduler,
    stores::{EventStore, ShipmentStore, SubscriptionStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("starting cargotrack tracking service");

    let config = config::load_config()?;

    let db = db::establish_connection(&config.database_url).await?;
    if config.auto_migrate {
        db::ensure_schema(&db).await?;
        catalog::seed_reference_data(&db).await?;
    }

    let catalog = Arc::new(MilestoneCatalog::load(&db).await?);

    // Stores
    let shipments = ShipmentStore::new(db.clone());
    let events = EventStore::new(db.clone());
    let subscriptions = SubscriptionStore::new(db.clone());

    // Bus + pipeline
    let (bus_tx, bus_rx) = mpsc::channel(1024);
    let bus = EventSender::new(bus_tx);
    let pipeline = TrackingPipeline::new(db.clone(), events.clone(), shipments.clone(), bus);

    // Hub
    let hub = Arc::new(TrackingHub::new(
        config.hub.client_queue_capacity,
        config.hub.overflow_disconnect_after,
    ));

    // Notification dispatcher
    let (job_tx, job_rx) = mpsc::channel(4096);
    let notification_queue = NotificationQueue::new(job_tx);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        db.clone(),
        events.clone(),
        subscriptions.clone(),
        vec![
            Arc::new(WebhookDelivery::new()),
            Arc::new(EmailDelivery),
            Arc::new(SmsDelivery),
            Arc::new(PushDelivery),
        ],
        config.notifications.clone(),
        notification_queue.clone(),
    ));

    // Adapters
    let manual_adapter = Arc::new(ManualAdapter::new(catalog.clone()));
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(CarrierAdapter),
        Arc::new(CustomsAdapter),
        manual_adapter.clone(),
    ];
    if config.feed.enabled {
        adapters.push(Arc::new(IndustryFeedAdapter::new(
            &config.feed,
            catalog.clone(),
        )));
    } else {
        warn!("industry feed adapter disabled by configuration");
    }

    let scheduler = Arc::new(PollScheduler::new(
        db.clone(),
        shipments.clone(),
        pipeline.clone(),
        adapters,
        config.scheduler.clone(),
    ));

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        auth: AuthService::new(&config.jwt_secret),
        shipments,
        events,
        subscriptions: subscriptions.clone(),
        pipeline,
        hub: hub.clone(),
        scheduler: scheduler.clone(),
        manual_adapter,
        catalog,
        snapshot_cache: Arc::new(SnapshotCache::new(config.snapshot_cache_ttl_secs)),
        rate_limiter: Arc::new(RateLimiter::new(
            config.rate_limit_requests_per_window,
            Duration::from_secs(config.rate_limit_window_seconds),
        )),
    };

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fanout_handle = tokio::spawn(process_events(
        bus_rx,
        hub.clone(),
        subscriptions,
        notification_queue,
    ));
    let scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(job_rx, shutdown_rx.clone()));

    // Startup sweep recovers anything lost between commit and emit in a
    // previous run.
    if let Err(e) = dispatcher.sweep().await {
        warn!(error = %e, "startup notification sweep failed");
    }
    let sweeper_handle = tokio::spawn(dispatcher.run_sweeper(shutdown_rx));

    // HTTP surface
    let app = Router::new()
        .nest("/tracking", handlers::tracking_routes(state.clone()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("cargotrack API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Graceful shutdown: tell clients, stop the tick loop, flush in-flight
    // notifications up to the grace deadline, then close the pool.
    info!("shutdown initiated");
    hub.broadcast_shutdown("service restarting");
    let _ = shutdown_tx.send(true);

    let grace = config.shutdown_grace();
    let drain = async {
        let _ = scheduler_handle.await;
        let _ = dispatcher_handle.await;
        let _ = sweeper_handle.await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("shutdown grace period expired with work in flight");
    }
    fanout_handle.abort();

    db.close().await?;
    info!("cargotrack API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
