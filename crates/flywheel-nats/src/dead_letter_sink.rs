use async_trait::async_trait;
use common::nats::JetStreamPublisher;
use flywheel_domain::{DeadLetterRecord, DeadLetterSink, PipelineError, PipelineResult};
use std::sync::Arc;
use tracing::debug;

/// Publishes dead-letter records to `<original subject>.dlq.v2` on the
/// telemetry stream.
pub struct NatsDeadLetterSink {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsDeadLetterSink {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeadLetterSink for NatsDeadLetterSink {
    async fn publish(&self, record: DeadLetterRecord) -> PipelineResult<()> {
        let subject = record.dead_letter_subject();
        let payload = serde_json::to_vec(&record)
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))?;

        debug!(
            subject = %subject,
            error_type = %record.error_type,
            size_bytes = payload.len(),
            "publishing dead-letter record"
        );

        self.publisher
            .publish(subject, payload.into())
            .await
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::nats::MockJetStreamPublisher;
    use flywheel_domain::DeadLetterKind;
    use std::collections::BTreeMap;

    fn record() -> DeadLetterRecord {
        DeadLetterRecord::new(
            "bike.000001.heartrate",
            br#"{"value":999}"#,
            BTreeMap::new(),
            DeadLetterKind::Validation,
            "value 999 outside allowed range",
            None,
        )
    }

    #[tokio::test]
    async fn publishes_to_the_versioned_failure_subject() {
        let mut publisher = MockJetStreamPublisher::new();

        publisher
            .expect_publish()
            .withf(|subject: &String, payload: &bytes::Bytes| {
                let wire: serde_json::Value = serde_json::from_slice(payload).unwrap();
                subject == "bike.000001.heartrate.dlq.v2"
                    && wire["errorType"] == "VALIDATION_ERROR"
                    && wire["dlqVersion"] == "v2"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let sink = NatsDeadLetterSink::new(Arc::new(publisher));

        assert!(sink.publish(record()).await.is_ok());
    }

    #[tokio::test]
    async fn publish_failure_maps_to_publish_failed() {
        let mut publisher = MockJetStreamPublisher::new();

        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream gone")));

        let sink = NatsDeadLetterSink::new(Arc::new(publisher));

        let result = sink.publish(record()).await;
        assert!(matches!(result, Err(PipelineError::PublishFailed(_))));
    }
}
