use crate::models::TelemetryRow;
use flywheel_domain::ValidatedReading;

impl From<&ValidatedReading> for TelemetryRow {
    fn from(reading: &ValidatedReading) -> Self {
        Self {
            message_id: reading.message_id.to_string(),
            schema_version: reading.schema_version,
            device_id: reading.device_id.clone(),
            sensor_type: reading.sensor.as_str().to_string(),
            value: reading.value,
            unit_name: reading.unit_name.clone(),
            occurred_at: reading.timestamp,
            bike_id: reading.bike_id.clone().unwrap_or_default(),
            workout_id: reading.workout_id.clone().unwrap_or_default(),
            user_id: reading.user_id.clone().unwrap_or_default(),
            metadata: serde_json::Value::Object(reading.metadata.clone()).to_string(),
            quality_score: reading.quality_score,
            is_valid: reading.is_valid,
            anomaly_detected: reading.anomaly_detected,
            validation_errors: reading.validation_errors.clone(),
            received_at: reading.received_at,
            processed_at: reading.processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flywheel_domain::{SensorKind, SCHEMA_VERSION};
    use uuid::Uuid;

    fn reading() -> ValidatedReading {
        ValidatedReading {
            message_id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            device_id: "000001".to_string(),
            sensor: SensorKind::HeartRate,
            value: 75.0,
            unit_name: "bpm".to_string(),
            timestamp: Utc::now(),
            bike_id: None,
            workout_id: Some("workout-9".to_string()),
            user_id: None,
            metadata: serde_json::Map::new(),
            quality_score: 95,
            is_valid: true,
            anomaly_detected: false,
            validation_errors: vec![],
            received_at: Utc::now(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn optional_ids_flatten_to_empty_strings() {
        let row = TelemetryRow::from(&reading());

        assert_eq!(row.bike_id, "");
        assert_eq!(row.workout_id, "workout-9");
        assert_eq!(row.user_id, "");
    }

    #[test]
    fn sensor_and_metadata_use_wire_representations() {
        let row = TelemetryRow::from(&reading());

        assert_eq!(row.sensor_type, "heartrate");
        assert_eq!(row.metadata, "{}");
        assert_eq!(row.quality_score, 95);
        assert!(row.is_valid);
    }
}
