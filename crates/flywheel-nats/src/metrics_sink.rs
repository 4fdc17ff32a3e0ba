use async_trait::async_trait;
use common::nats::CorePublisher;
use flywheel_domain::{MetricsSink, PipelineError, PipelineResult, ProcessingMetrics};
use std::sync::Arc;
use tracing::debug;

/// Default subject processing metrics are published to
pub const METRICS_SUBJECT: &str = "flywheel.metrics.processing";

/// Fire-and-forget metrics publisher. Uses the core (non-JetStream) client
/// on purpose: nothing awaits stream acknowledgment, and a broker hiccup
/// loses a metrics point instead of stalling ingestion.
pub struct NatsMetricsSink {
    publisher: Arc<dyn CorePublisher>,
    subject: String,
}

impl NatsMetricsSink {
    pub fn new(publisher: Arc<dyn CorePublisher>, subject: impl Into<String>) -> Self {
        Self {
            publisher,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl MetricsSink for NatsMetricsSink {
    async fn publish(&self, metrics: ProcessingMetrics) -> PipelineResult<()> {
        let payload = serde_json::to_vec(&metrics)
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))?;

        debug!(
            subject = %self.subject,
            message_id = %metrics.message_id,
            processing_time_ms = metrics.processing_time,
            "publishing processing metrics"
        );

        self.publisher
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}
