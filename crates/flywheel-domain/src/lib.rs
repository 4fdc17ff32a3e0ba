pub mod error;
pub mod pipeline;
pub mod ports;
pub mod reading;
pub mod retry;
pub mod sensor;
pub mod topic;
pub mod validator;

pub use error::{DeadLetterKind, PipelineError, PipelineResult};
pub use pipeline::{PipelineOutcome, ReadingPipelineService};
pub use ports::{ControlPublisher, DeadLetterSink, MetricsSink, TelemetryRepository};
pub use reading::{
    ControlCommand, DeadLetterRecord, ProcessingMetrics, RawReading, ValidatedReading, DLQ_SUFFIX,
    DLQ_VERSION, SCHEMA_VERSION,
};
pub use retry::RetryPolicy;
pub use sensor::SensorKind;
pub use topic::{ParsedTopic, TopicError, TopicRouter};
pub use validator::{should_drop, validate, ANOMALY_THRESHOLD, DROP_THRESHOLD};
