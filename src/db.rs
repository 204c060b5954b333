use crate::errors::ServiceError;
use sea_orm::sea_query::TableCreateStatement;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema,
};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Configuration for database connections.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

/// Establishes a connection pool with custom settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("configuring database connection: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    // Shared-cache SQLite keeps its data alive through the first connection;
    // a wider pool would race schema creation.
    if config.url.starts_with("sqlite") {
        opt.max_connections(1).min_connections(1);
    }

    let pool = Database::connect(opt).await?;
    info!("database connection established");
    Ok(pool)
}

/// Creates any missing tables from the entity definitions.
///
/// Full DDL migration tooling is an external concern; this bootstrap covers
/// embedded and test deployments, guarded by the `auto_migrate` config flag.
pub async fn ensure_schema(db: &DbPool) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, backend, schema.create_table_from_entity(crate::entities::Shipment)).await?;
    create_table(
        db,
        backend,
        schema.create_table_from_entity(crate::entities::TrackingEvent),
    )
    .await?;
    create_table(db, backend, schema.create_table_from_entity(crate::entities::Milestone)).await?;
    create_table(
        db,
        backend,
        schema.create_table_from_entity(crate::entities::TrackingSource),
    )
    .await?;
    create_table(
        db,
        backend,
        schema.create_table_from_entity(crate::entities::TrackingSubscription),
    )
    .await?;
    create_table(
        db,
        backend,
        schema.create_table_from_entity(crate::entities::NotificationDelivery),
    )
    .await?;

    info!("schema bootstrap complete");
    Ok(())
}

async fn create_table(
    db: &DbPool,
    backend: DbBackend,
    mut stmt: TableCreateStatement,
) -> Result<(), ServiceError> {
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}
