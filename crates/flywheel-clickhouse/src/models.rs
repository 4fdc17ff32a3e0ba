use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// Database row for one accepted telemetry reading. Optional ids flatten to
/// empty strings and the metadata map is stored as JSON text, keeping the
/// table free of Nullable columns on the hot insert path.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub message_id: String,
    pub schema_version: u16,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit_name: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub occurred_at: DateTime<Utc>,
    pub bike_id: String,
    pub workout_id: String,
    pub user_id: String,
    pub metadata: String,
    pub quality_score: u8,
    pub is_valid: bool,
    pub anomaly_detected: bool,
    pub validation_errors: Vec<String>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub received_at: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    pub processed_at: DateTime<Utc>,
}
