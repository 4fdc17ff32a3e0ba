use crate::error::PipelineResult;
use crate::reading::{ControlCommand, DeadLetterRecord, ProcessingMetrics, ValidatedReading};
use async_trait::async_trait;

/// Write-side port of the telemetry store. Implementations can be
/// ClickHouse, an in-memory table for tests, or anything else that can
/// durably keep a reading.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Durably insert one validated reading
    async fn insert_reading(&self, reading: &ValidatedReading) -> PipelineResult<()>;
}

/// Port for routing failed messages to their failure channel
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Publish one dead-letter record. Best-effort: callers log failures
    /// and move on, they never retry.
    async fn publish(&self, record: DeadLetterRecord) -> PipelineResult<()>;
}

/// Port for the fire-and-forget metrics channel
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Publish per-message processing metrics
    async fn publish(&self, metrics: ProcessingMetrics) -> PipelineResult<()>;
}

/// Port for publishing control commands back to a device
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ControlPublisher: Send + Sync {
    /// Publish one control command to the device's control subject
    async fn publish(&self, command: ControlCommand) -> PipelineResult<()>;
}
