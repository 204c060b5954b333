use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Industry-feed integration settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct FeedConfig {
    /// Base URL of the external tracking data provider
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,

    /// API key presented to the provider
    #[serde(default)]
    pub api_key: String,

    /// Whether the feed adapter participates in polling
    #[serde(default)]
    pub enabled: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            api_key: String::new(),
            enabled: false,
        }
    }
}

fn default_feed_base_url() -> String {
    "https://feed.example.com/v2".to_string()
}

/// Poll scheduler settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Global tick interval in minutes
    #[serde(default = "default_scheduler_interval")]
    #[validate(range(min = 1))]
    pub interval_minutes: u64,

    /// Maximum shipments refreshed per tick
    #[serde(default = "default_scheduler_batch")]
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: u64,

    /// Concurrent upstream calls allowed per source
    #[serde(default = "default_source_concurrency")]
    #[validate(range(min = 1))]
    pub source_concurrency: usize,

    /// Deadline for a single adapter fetch, in seconds
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_scheduler_interval(),
            batch_size: default_scheduler_batch(),
            source_concurrency: default_source_concurrency(),
            adapter_timeout_secs: default_adapter_timeout(),
        }
    }
}

fn default_scheduler_interval() -> u64 {
    1
}
fn default_scheduler_batch() -> u64 {
    100
}
fn default_source_concurrency() -> usize {
    4
}
fn default_adapter_timeout() -> u64 {
    30
}

/// Notification dispatcher settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct NotificationConfig {
    /// First retry delay in seconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Retry delay ceiling in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Delivery attempts before a job is marked failed
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Sweeper period in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Deadline for a single delivery call, in seconds
    #[serde(default = "default_adapter_timeout")]
    pub delivery_timeout_secs: u64,

    /// Concurrent deliveries allowed per method
    #[serde(default = "default_method_concurrency")]
    pub method_concurrency: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval(),
            delivery_timeout_secs: default_adapter_timeout(),
            method_concurrency: default_method_concurrency(),
        }
    }
}

fn default_initial_backoff() -> u64 {
    2
}
fn default_max_backoff() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_method_concurrency() -> usize {
    8
}

/// Push hub settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct HubConfig {
    /// Outbound queue capacity per connected client
    #[serde(default = "default_client_queue_capacity")]
    #[validate(range(min = 1))]
    pub client_queue_capacity: usize,

    /// Dropped-frame count after which a client is disconnected
    #[serde(default = "default_overflow_disconnect")]
    pub overflow_disconnect_after: u64,

    /// Recent events included in the subscribe snapshot
    #[serde(default = "default_snapshot_events")]
    pub snapshot_recent_events: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue_capacity: default_client_queue_capacity(),
            overflow_disconnect_after: default_overflow_disconnect(),
            snapshot_recent_events: default_snapshot_events(),
        }
    }
}

fn default_client_queue_capacity() -> usize {
    256
}
fn default_overflow_disconnect() -> u64 {
    64
}
fn default_snapshot_events() -> u64 {
    10
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Cache endpoint for multi-instance deployments
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HS256 secret for auth-token verification (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to create missing tables and seed reference data on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Public snapshot cache TTL in seconds
    #[serde(default = "default_snapshot_cache_ttl")]
    pub snapshot_cache_ttl_secs: u64,

    /// Rate limiting for the public tracking endpoint: requests per window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests_per_window: u32,

    /// Rate limiting window size in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_seconds: u64,

    /// Grace period for draining in-flight work on shutdown, in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    #[validate(nested)]
    pub feed: FeedConfig,

    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    #[validate(nested)]
    pub hub: HubConfig,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_snapshot_cache_ttl() -> u64 {
    30
}
fn default_rate_limit_requests() -> u32 {
    60
}
fn default_rate_limit_window() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    30
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(database_url: String, jwt_secret: String, host: String, port: u16) -> Self {
        Self {
            database_url,
            redis_url: default_redis_url(),
            jwt_secret,
            host,
            port,
            environment: "test".to_string(),
            log_level: default_log_level(),
            auto_migrate: false,
            snapshot_cache_ttl_secs: default_snapshot_cache_ttl(),
            rate_limit_requests_per_window: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window(),
            shutdown_grace_secs: default_shutdown_grace(),
            feed: FeedConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationConfig::default(),
            hub: HubConfig::default(),
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_minutes * 60)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.adapter_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Loads configuration from layered sources.
///
/// Order of precedence, lowest first: `config/default.toml`, the
/// environment-specific `config/{env}.toml`, then `APP__`-prefixed
/// environment variables (`APP__SCHEDULER__BATCH_SIZE=50`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %config.environment, "configuration loaded");
    Ok(config)
}
