use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope pushed to live clients for each processed reading.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataEnvelope {
    pub topic: String,
    pub device_id: String,
    /// Sensor type segment of the topic, kept under its historical wire name
    pub device_type: String,
    pub is_report: bool,
    pub data: Value,
    pub received_at: DateTime<Utc>,
}

/// Events a socket client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        device_id: String,
        sensor_types: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    PublishControl {
        device_id: String,
        control_type: String,
        value: f64,
        command: String,
    },
}

/// Events the bridge pushes to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Subscribed {
        device_id: String,
        sensor_types: Vec<String>,
    },
    SensorData(SensorDataEnvelope),
    #[serde(rename_all = "camelCase")]
    ControlPublished { topic: String, payload: Value },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_event_parses_from_the_wire() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "subscribe",
            "data": {"deviceId": "000001", "sensorTypes": ["heartrate", "power"]}
        }))
        .unwrap();

        match event {
            ClientEvent::Subscribe {
                device_id,
                sensor_types,
            } => {
                assert_eq!(device_id, "000001");
                assert_eq!(sensor_types, vec!["heartrate", "power"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_control_event_parses_from_the_wire() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "publish_control",
            "data": {"deviceId": "000001", "controlType": "resistance", "value": 55, "command": "set_resistance"}
        }))
        .unwrap();

        assert!(matches!(
            event,
            ClientEvent::PublishControl { value, .. } if value == 55.0
        ));
    }

    #[test]
    fn sensor_data_event_serializes_tagged() {
        let event = ServerEvent::SensorData(SensorDataEnvelope {
            topic: "bike.000001.heartrate".to_string(),
            device_id: "000001".to_string(),
            device_type: "heartrate".to_string(),
            is_report: false,
            data: json!({"value": 75}),
            received_at: Utc::now(),
        });

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["event"], "sensor_data");
        assert_eq!(wire["data"]["deviceId"], "000001");
        assert_eq!(wire["data"]["deviceType"], "heartrate");
    }

    #[test]
    fn error_event_carries_the_message() {
        let wire = serde_json::to_value(ServerEvent::Error {
            message: "publish failed".to_string(),
        })
        .unwrap();

        assert_eq!(wire["event"], "error");
        assert_eq!(wire["data"]["message"], "publish failed");
    }
}
