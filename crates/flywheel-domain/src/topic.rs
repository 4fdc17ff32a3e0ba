use crate::sensor::SensorKind;
use thiserror::Error;

/// Default namespace prefix for device data subjects
pub const DEFAULT_NAMESPACE: &str = "bike";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("subject has {0} segments, expected at least 3")]
    TooFewSegments(usize),

    #[error("unexpected namespace: {0}")]
    WrongNamespace(String),

    #[error("unknown sensor type: {0}")]
    UnknownSensor(String),
}

/// Result of parsing a data subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: String,
    pub sensor: SensorKind,
    pub is_control: bool,
}

/// Parses subjects of the form `<namespace>.<deviceId>.<sensorType>[.control]`
/// and builds outgoing subjects under the same namespace.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    namespace: String,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl TopicRouter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn parse(&self, subject: &str) -> Result<ParsedTopic, TopicError> {
        let segments: Vec<&str> = subject.split('.').collect();

        if segments.len() < 3 {
            return Err(TopicError::TooFewSegments(segments.len()));
        }
        if segments[0] != self.namespace {
            return Err(TopicError::WrongNamespace(segments[0].to_string()));
        }

        let sensor = SensorKind::from_segment(segments[2])
            .ok_or_else(|| TopicError::UnknownSensor(segments[2].to_string()))?;

        Ok(ParsedTopic {
            device_id: segments[1].to_string(),
            sensor,
            is_control: segments.get(3) == Some(&"control"),
        })
    }

    pub fn data_subject(&self, device_id: &str, sensor: SensorKind) -> String {
        format!("{}.{}.{}", self.namespace, device_id, sensor.as_str())
    }

    pub fn control_subject(&self, device_id: &str, control_type: SensorKind) -> String {
        format!(
            "{}.{}.{}.control",
            self.namespace,
            device_id,
            control_type.as_str()
        )
    }

    /// Wildcard matching exactly the three-segment data subjects. Control
    /// and dead-letter subjects have more segments and fall outside it.
    pub fn data_subject_filter(&self) -> String {
        format!("{}.*.*", self.namespace)
    }

    /// Wildcard matching the control variants of the data subjects
    pub fn control_subject_filter(&self) -> String {
        format!("{}.*.*.control", self.namespace)
    }

    /// Wildcard covering every subject under the namespace
    pub fn all_subjects(&self) -> String {
        format!("{}.>", self.namespace)
    }
}
