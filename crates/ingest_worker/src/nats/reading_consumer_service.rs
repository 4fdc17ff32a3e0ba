use common::nats::{ConsumeRequest, ConsumeResponse};
use flywheel_domain::{DeadLetterKind, ReadingPipelineService};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::error;

/// Tower service driving the reading pipeline for each consumed message.
///
/// Every outcome the pipeline reports is terminal (persisted, dead-lettered
/// or skipped), so the message is acknowledged. An error escaping the
/// pipeline is the catch-all boundary: the message is dead-lettered
/// generically and still acknowledged so one poisoned payload cannot wedge
/// its partition.
#[derive(Clone)]
pub struct ReadingConsumerService {
    pipeline: Arc<ReadingPipelineService>,
}

impl ReadingConsumerService {
    pub fn new(pipeline: Arc<ReadingPipelineService>) -> Self {
        Self { pipeline }
    }
}

impl Service<ConsumeRequest> for ReadingConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);

        Box::pin(async move {
            let headers = header_map(&req);

            match pipeline
                .process(&req.subject, &req.payload, headers.clone())
                .await
            {
                Ok(_outcome) => Ok(ConsumeResponse::ack()),
                Err(e) => {
                    error!(
                        subject = %req.subject,
                        error = %e,
                        "pipeline failed unexpectedly, dead-lettering"
                    );
                    pipeline
                        .dead_letter(
                            &req.subject,
                            &req.payload,
                            &headers,
                            DeadLetterKind::Unexpected,
                            e.to_string(),
                            None,
                        )
                        .await;
                    Ok(ConsumeResponse::ack())
                }
            }
        })
    }
}

fn header_map(req: &ConsumeRequest) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(headers) = &req.headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                map.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flywheel_domain::ports::{MockDeadLetterSink, MockMetricsSink, MockTelemetryRepository};
    use flywheel_domain::{
        DeadLetterRecord, ProcessingMetrics, RetryPolicy, TopicRouter, ValidatedReading,
    };
    use std::time::Duration;

    fn pipeline(
        repository: MockTelemetryRepository,
        dead_letters: MockDeadLetterSink,
        metrics: MockMetricsSink,
    ) -> Arc<ReadingPipelineService> {
        Arc::new(ReadingPipelineService::new(
            TopicRouter::default(),
            Arc::new(repository),
            Arc::new(dead_letters),
            Arc::new(metrics),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::ZERO,
            },
        ))
    }

    #[tokio::test]
    async fn persisted_reading_acks() {
        let mut repository = MockTelemetryRepository::new();
        let mut metrics = MockMetricsSink::new();
        let dead_letters = MockDeadLetterSink::new();

        repository
            .expect_insert_reading()
            .withf(|r: &ValidatedReading| r.device_id == "000001")
            .times(1)
            .returning(|_| Ok(()));
        metrics
            .expect_publish()
            .withf(|_m: &ProcessingMetrics| true)
            .times(1)
            .returning(|_| Ok(()));

        let mut service = ReadingConsumerService::new(pipeline(repository, dead_letters, metrics));

        let response = service
            .call(ConsumeRequest::new(
                "bike.000001.heartrate".to_string(),
                Bytes::from(
                    r#"{"value": 75, "unitName": "bpm", "deviceId": "000001",
                       "workoutId": "w-1", "metadata": {}}"#,
                ),
                None,
            ))
            .await
            .unwrap();

        assert!(response.is_ack());
    }

    #[tokio::test]
    async fn dead_lettered_reading_still_acks() {
        let repository = MockTelemetryRepository::new();
        let metrics = MockMetricsSink::new();
        let mut dead_letters = MockDeadLetterSink::new();

        dead_letters
            .expect_publish()
            .withf(|r: &DeadLetterRecord| r.error_type == "JSON_PARSE_ERROR")
            .times(1)
            .returning(|_| Ok(()));

        let mut service = ReadingConsumerService::new(pipeline(repository, dead_letters, metrics));

        let response = service
            .call(ConsumeRequest::new(
                "bike.000001.heartrate".to_string(),
                Bytes::from("{truncated"),
                None,
            ))
            .await
            .unwrap();

        // Terminal at the dead-letter queue: no redelivery wanted
        assert!(response.is_ack());
    }

    #[tokio::test]
    async fn control_delivery_acks_without_side_effects() {
        let repository = MockTelemetryRepository::new();
        let metrics = MockMetricsSink::new();
        let dead_letters = MockDeadLetterSink::new();

        let mut service = ReadingConsumerService::new(pipeline(repository, dead_letters, metrics));

        let response = service
            .call(ConsumeRequest::new(
                "bike.000001.fan.control".to_string(),
                Bytes::from(r#"{"value": 80}"#),
                None,
            ))
            .await
            .unwrap();

        assert!(response.is_ack());
    }
}
