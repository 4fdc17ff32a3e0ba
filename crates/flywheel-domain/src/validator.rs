use crate::reading::{RawReading, ValidatedReading, SCHEMA_VERSION};
use crate::sensor::SensorKind;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Readings scoring below this are flagged anomalous (but may still persist)
pub const ANOMALY_THRESHOLD: u8 = 70;

/// Invalid readings scoring below this are dropped to the dead-letter queue
pub const DROP_THRESHOLD: u8 = 50;

/// A device timestamp further than this from ingest time is considered stale
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

const MISSING_VALUE_PENALTY: i32 = 50;
const MISSING_UNIT_PENALTY: i32 = 30;
const OUT_OF_RANGE_PENALTY: i32 = 40;
const UNIT_MISMATCH_PENALTY: i32 = 20;
const STALE_TIMESTAMP_PENALTY: i32 = 10;
const MISSING_FIELD_PENALTY: i32 = 5;

/// Score a raw reading and normalize it.
///
/// Scoring starts at 100 and applies fixed deductions, clamped at 0. Hard
/// problems (bad value, bad unit, out of range, stale timestamp) record an
/// error string; incomplete-but-usable payloads (no deviceId echo, no
/// workoutId, no metadata) only cost points. The two downstream thresholds
/// are deliberately independent: `anomaly_detected` compares against
/// [`ANOMALY_THRESHOLD`], while the drop decision in [`should_drop`] uses
/// [`DROP_THRESHOLD`] and applies only to invalid readings.
pub fn validate(
    device_id: &str,
    sensor: SensorKind,
    raw: RawReading,
    received_at: DateTime<Utc>,
) -> ValidatedReading {
    let mut score: i32 = 100;
    let mut errors: Vec<String> = Vec::new();

    let coerced = coerce_numeric(raw.value.as_ref());
    match coerced {
        None => {
            score -= MISSING_VALUE_PENALTY;
            errors.push("value is missing or not numeric".to_string());
        }
        Some(v) => {
            let (min, max) = sensor.range();
            if v < min || v > max {
                score -= OUT_OF_RANGE_PENALTY;
                errors.push(format!("value {v} outside allowed range [{min}, {max}]"));
            }
        }
    }

    let unit = match raw.unit_name {
        Some(Value::String(s)) => Some(s),
        _ => {
            score -= MISSING_UNIT_PENALTY;
            errors.push("unitName is missing or not a string".to_string());
            None
        }
    };
    if let Some(unit) = &unit {
        if unit != sensor.expected_unit() {
            score -= UNIT_MISMATCH_PENALTY;
            errors.push(format!(
                "unit {unit} does not match expected {}",
                sensor.expected_unit()
            ));
        }
    }

    let timestamp = raw
        .timestamp
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    if let Some(ts) = timestamp {
        if (received_at - ts).num_seconds().abs() > MAX_TIMESTAMP_SKEW_SECS {
            score -= STALE_TIMESTAMP_PENALTY;
            errors.push(format!(
                "timestamp more than {MAX_TIMESTAMP_SKEW_SECS}s from ingest time"
            ));
        }
    }

    // Completeness costs points without recording errors
    if raw.device_id.is_none() {
        score -= MISSING_FIELD_PENALTY;
    }
    if raw.workout_id.is_none() {
        score -= MISSING_FIELD_PENALTY;
    }
    if raw.metadata.is_none() {
        score -= MISSING_FIELD_PENALTY;
    }

    let quality_score = score.clamp(0, 100) as u8;

    ValidatedReading {
        message_id: Uuid::new_v4(),
        schema_version: SCHEMA_VERSION,
        device_id: device_id.to_string(),
        sensor,
        value: coerced.unwrap_or(0.0),
        unit_name: unit.unwrap_or_default(),
        timestamp: timestamp.unwrap_or(received_at),
        bike_id: raw.bike_id,
        workout_id: raw.workout_id,
        user_id: raw.user_id,
        metadata: raw.metadata.unwrap_or_default(),
        quality_score,
        is_valid: errors.is_empty(),
        anomaly_detected: quality_score < ANOMALY_THRESHOLD,
        validation_errors: errors,
        received_at,
        processed_at: Utc::now(),
    }
}

/// Drop policy: only invalid readings below the drop floor are discarded.
/// Invalid readings at or above it persist, flagged anomalous or not by the
/// separate anomaly threshold.
pub fn should_drop(reading: &ValidatedReading) -> bool {
    !reading.is_valid && reading.quality_score < DROP_THRESHOLD
}

fn coerce_numeric(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn complete_payload(value: Value, unit: &str) -> RawReading {
        RawReading {
            value: Some(value),
            unit_name: Some(Value::from(unit)),
            timestamp: Some(Utc::now().timestamp()),
            device_id: Some("000001".to_string()),
            bike_id: Some("bike-1".to_string()),
            workout_id: Some("workout-9".to_string()),
            user_id: Some("user-7".to_string()),
            metadata: Some(Map::new()),
        }
    }

    #[test]
    fn complete_in_range_reading_scores_100() {
        let reading = validate(
            "000001",
            SensorKind::HeartRate,
            complete_payload(json!(75), "bpm"),
            Utc::now(),
        );

        assert_eq!(reading.quality_score, 100);
        assert!(reading.is_valid);
        assert!(!reading.anomaly_detected);
        assert!(reading.validation_errors.is_empty());
        assert!(!should_drop(&reading));
    }

    #[test]
    fn out_of_range_value_deducts_40_and_invalidates() {
        let reading = validate(
            "000001",
            SensorKind::HeartRate,
            complete_payload(json!(250), "bpm"),
            Utc::now(),
        );

        assert_eq!(reading.quality_score, 60);
        assert!(!reading.is_valid);
        // 60 is above the drop floor but below the anomaly threshold
        assert!(!should_drop(&reading));
        assert!(reading.anomaly_detected);
    }

    #[test]
    fn unit_mismatch_adds_20_on_top_of_other_deductions() {
        let in_range = validate(
            "000001",
            SensorKind::Cadence,
            complete_payload(json!(90), "bpm"),
            Utc::now(),
        );
        assert_eq!(in_range.quality_score, 80);

        let out_of_range = validate(
            "000001",
            SensorKind::Cadence,
            complete_payload(json!(900), "bpm"),
            Utc::now(),
        );
        assert_eq!(out_of_range.quality_score, 40);
    }

    #[test]
    fn score_never_goes_below_zero() {
        let raw = RawReading {
            value: Some(Value::from("not-a-number")),
            unit_name: Some(json!({"nested": true})),
            timestamp: Some(0),
            ..Default::default()
        };

        let reading = validate("000001", SensorKind::Power, raw, Utc::now());

        // 100 - 50 - 30 - 10 - 15 clamps at 0
        assert_eq!(reading.quality_score, 0);
        assert!(!reading.is_valid);
        assert!(should_drop(&reading));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let reading = validate(
            "000001",
            SensorKind::Power,
            complete_payload(json!("150.5"), "watts"),
            Utc::now(),
        );

        assert_eq!(reading.value, 150.5);
        assert_eq!(reading.quality_score, 100);
    }

    #[test]
    fn missing_completeness_fields_cost_points_without_errors() {
        let raw = RawReading {
            value: Some(json!(75)),
            unit_name: Some(Value::from("bpm")),
            timestamp: Some(Utc::now().timestamp()),
            ..Default::default()
        };

        let reading = validate("000001", SensorKind::HeartRate, raw, Utc::now());

        assert_eq!(reading.quality_score, 85);
        assert!(reading.is_valid);
        assert!(reading.validation_errors.is_empty());
    }

    #[test]
    fn stale_timestamp_deducts_10() {
        let mut raw = complete_payload(json!(75), "bpm");
        raw.timestamp = Some(Utc::now().timestamp() - 3600);

        let reading = validate("000001", SensorKind::HeartRate, raw, Utc::now());

        assert_eq!(reading.quality_score, 90);
        assert!(!reading.is_valid);
    }

    #[test]
    fn missing_timestamp_defaults_to_ingest_time_without_penalty() {
        let mut raw = complete_payload(json!(75), "bpm");
        raw.timestamp = None;

        let received_at = Utc::now();
        let reading = validate("000001", SensorKind::HeartRate, raw, received_at);

        assert_eq!(reading.quality_score, 100);
        assert_eq!(reading.timestamp, received_at);
    }

    #[test]
    fn negative_incline_within_range_is_valid() {
        let reading = validate(
            "000001",
            SensorKind::Incline,
            complete_payload(json!(-12), "percent"),
            Utc::now(),
        );

        assert_eq!(reading.quality_score, 100);
        assert!(reading.is_valid);
    }

    #[test]
    fn drop_and_anomaly_thresholds_stay_independent() {
        // invalid at 60: anomalous yet kept
        let kept = validate(
            "000001",
            SensorKind::HeartRate,
            complete_payload(json!(250), "bpm"),
            Utc::now(),
        );
        assert!(!should_drop(&kept) && kept.anomaly_detected);

        // invalid at 40: dropped
        let dropped = validate(
            "000001",
            SensorKind::Cadence,
            complete_payload(json!(900), "bpm"),
            Utc::now(),
        );
        assert_eq!(dropped.quality_score, 40);
        assert!(should_drop(&dropped));
    }

    #[test]
    fn every_message_gets_a_distinct_id() {
        let a = validate(
            "000001",
            SensorKind::HeartRate,
            complete_payload(json!(75), "bpm"),
            Utc::now(),
        );
        let b = validate(
            "000001",
            SensorKind::HeartRate,
            complete_payload(json!(75), "bpm"),
            Utc::now(),
        );

        assert_ne!(a.message_id, b.message_id);
    }
}
