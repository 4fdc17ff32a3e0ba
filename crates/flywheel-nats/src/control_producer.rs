use async_trait::async_trait;
use common::nats::JetStreamPublisher;
use flywheel_domain::{
    ControlCommand, ControlPublisher, PipelineError, PipelineResult, TopicRouter,
};
use std::sync::Arc;
use tracing::debug;

/// Publishes control commands onto the device's control subject.
pub struct NatsControlPublisher {
    publisher: Arc<dyn JetStreamPublisher>,
    router: TopicRouter,
}

impl NatsControlPublisher {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>, router: TopicRouter) -> Self {
        Self { publisher, router }
    }
}

#[async_trait]
impl ControlPublisher for NatsControlPublisher {
    async fn publish(&self, command: ControlCommand) -> PipelineResult<()> {
        let subject = self
            .router
            .control_subject(&command.device_id, command.control_type);
        let payload = serde_json::to_vec(&command)
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))?;

        debug!(
            subject = %subject,
            device_id = %command.device_id,
            command = %command.command,
            "publishing control command"
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
    use flywheel_domain::SensorKind;

    #[tokio::test]
    async fn publishes_to_the_device_control_subject() {
        let mut publisher = MockJetStreamPublisher::new();

        publisher
            .expect_publish()
            .withf(|subject: &String, payload: &bytes::Bytes| {
                let wire: serde_json::Value = serde_json::from_slice(payload).unwrap();
                subject == "bike.000042.fan.control"
                    && wire["value"] == 80.0
                    && wire["unitName"] == "percent"
                    && wire["command"] == "set_fan"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let producer = NatsControlPublisher::new(Arc::new(publisher), TopicRouter::default());
        let command = ControlCommand::new("000042", SensorKind::Fan, 80.0, "set_fan");

        assert!(producer.publish(command).await.is_ok());
    }

    #[tokio::test]
    async fn publish_failure_is_reported_to_the_caller() {
        let mut publisher = MockJetStreamPublisher::new();

        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream rejected publish")));

        let producer = NatsControlPublisher::new(Arc::new(publisher), TopicRouter::default());
        let command = ControlCommand::new("000042", SensorKind::Resistance, 55.0, "set_resistance");

        let result = producer.publish(command).await;
        assert!(matches!(result, Err(PipelineError::PublishFailed(_))));
    }
}
