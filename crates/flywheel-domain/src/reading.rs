use crate::error::DeadLetterKind;
use crate::sensor::SensorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Version stamped onto every validated reading
pub const SCHEMA_VERSION: u16 = 1;

/// Version of the dead-letter record format
pub const DLQ_VERSION: &str = "v2";

/// Subject suffix dead-letter records are published under
pub const DLQ_SUFFIX: &str = "dlq.v2";

/// Wire payload published by a device, mirrored 1:1. `value` and `unitName`
/// arrive as loose JSON values so the scorer can tell a missing field from
/// a mistyped one instead of failing the whole deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unit_name: Option<Value>,
    /// Unix seconds at which the device captured the reading
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub bike_id: Option<String>,
    #[serde(default)]
    pub workout_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// A reading after normalization and quality scoring. Lives for exactly one
/// pipeline pass: persisted or dead-lettered, then dropped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedReading {
    pub message_id: Uuid,
    pub schema_version: u16,
    pub device_id: String,
    pub sensor: SensorKind,
    pub value: f64,
    pub unit_name: String,
    pub timestamp: DateTime<Utc>,
    pub bike_id: Option<String>,
    pub workout_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub quality_score: u8,
    pub is_valid: bool,
    pub anomaly_detected: bool,
    pub validation_errors: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// Per-message processing metrics, published fire-and-forget after a
/// successful persist.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub device_id: String,
    pub device_type: SensorKind,
    pub message_id: Uuid,
    pub quality_score: u8,
    /// Milliseconds spent in the pipeline for this message
    pub processing_time: u64,
    pub anomaly_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Record published to the failure channel when a message cannot complete
/// its journey. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub original_value: String,
    pub original_headers: BTreeMap<String, String>,
    pub error_type: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub dlq_version: String,
}

impl DeadLetterRecord {
    pub fn new(
        original_topic: impl Into<String>,
        original_payload: &[u8],
        original_headers: BTreeMap<String, String>,
        kind: DeadLetterKind,
        error_message: impl Into<String>,
        additional_context: Option<Value>,
    ) -> Self {
        Self {
            original_topic: original_topic.into(),
            original_value: String::from_utf8_lossy(original_payload).into_owned(),
            original_headers,
            error_type: kind.as_wire().to_string(),
            error_message: error_message.into(),
            additional_context,
            timestamp: Utc::now(),
            dlq_version: DLQ_VERSION.to_string(),
        }
    }

    /// The failure channel for this record's original subject
    pub fn dead_letter_subject(&self) -> String {
        format!("{}.{}", self.original_topic, DLQ_SUFFIX)
    }
}

/// A control intent heading back to a device. The subject carries the
/// device id and control type; the payload carries the rest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    #[serde(skip)]
    pub device_id: String,
    #[serde(skip)]
    pub control_type: SensorKind,
    pub value: f64,
    pub unit_name: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
}

impl ControlCommand {
    /// Build a command, deriving the unit from the control type
    pub fn new(
        device_id: impl Into<String>,
        control_type: SensorKind,
        value: f64,
        command: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            control_type,
            value,
            unit_name: control_type.expected_unit().to_string(),
            timestamp: Utc::now(),
            command: command.into(),
        }
    }
}
