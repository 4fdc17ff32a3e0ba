use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding telemetry, control, and dead-letter subjects
    #[serde(default = "default_telemetry_stream")]
    pub telemetry_stream: String,

    /// Namespace prefix of device data subjects
    #[serde(default = "default_topic_namespace")]
    pub topic_namespace: String,

    /// Durable consumer name for the ingest worker
    #[serde(default = "default_ingest_consumer_name")]
    pub ingest_consumer_name: String,

    /// Durable consumer name for the distribution bridge
    #[serde(default = "default_bridge_consumer_name")]
    pub bridge_consumer_name: String,

    /// Messages fetched per pull request
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Partition workers consuming concurrently in the ingest worker
    #[serde(default = "default_ingest_partitions")]
    pub ingest_partitions: usize,

    /// Seconds between ack-deadline extensions for in-flight messages
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Subject processing metrics are published to
    #[serde(default = "default_metrics_subject")]
    pub metrics_subject: String,

    // Persistence retry configuration
    /// Insert attempts before a reading is dead-lettered
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per failed attempt
    #[serde(default = "default_persist_base_delay_ms")]
    pub persist_base_delay_ms: u64,

    /// Upper bound of the random jitter added to each backoff delay
    #[serde(default = "default_persist_max_jitter_ms")]
    pub persist_max_jitter_ms: u64,

    // ClickHouse configuration
    /// ClickHouse HTTP URL
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    /// ClickHouse database name
    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    /// ClickHouse username
    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    /// ClickHouse password
    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Table accepted readings are inserted into
    #[serde(default = "default_telemetry_table")]
    pub telemetry_table: String,

    // Distribution bridge configuration
    /// Bind address of the live-client server
    #[serde(default = "default_bridge_bind_address")]
    pub bridge_bind_address: String,

    /// Seconds between reaper sweeps for stale connections
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Seconds of inactivity after which a connection is reaped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for the OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_telemetry_stream() -> String {
    "telemetry".to_string()
}

fn default_topic_namespace() -> String {
    "bike".to_string()
}

fn default_ingest_consumer_name() -> String {
    "flywheel-ingest".to_string()
}

fn default_bridge_consumer_name() -> String {
    "flywheel-bridge".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_ingest_partitions() -> usize {
    4
}

fn default_progress_interval_secs() -> u64 {
    10
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_metrics_subject() -> String {
    "flywheel.metrics.processing".to_string()
}

// Persistence retry defaults
fn default_persist_max_attempts() -> u32 {
    3
}

fn default_persist_base_delay_ms() -> u64 {
    1000
}

fn default_persist_max_jitter_ms() -> u64 {
    1000
}

// ClickHouse defaults
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "flywheel".to_string()
}

fn default_clickhouse_username() -> String {
    "flywheel".to_string()
}

fn default_clickhouse_password() -> String {
    "flywheel".to_string()
}

fn default_telemetry_table() -> String {
    "telemetry_readings".to_string()
}

// Bridge defaults
fn default_bridge_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_idle_timeout_secs() -> u64 {
    300
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "flywheel-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FLYWHEEL"))
            .build()?
            .try_deserialize()
    }
}
