use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::Result;
use async_nats::jetstream::{self, AckKind, Message};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};

/// Settings for a partitioned consumer.
#[derive(Debug, Clone)]
pub struct PartitionedConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    /// Subjects this consumer receives (wildcards allowed)
    pub subject_filters: Vec<String>,
    /// Messages fetched per pull request
    pub batch_size: usize,
    /// How long one pull request waits for the batch to fill
    pub max_wait: Duration,
    /// Number of worker queues processed concurrently
    pub partitions: usize,
    /// How often an in-flight message extends its ack deadline
    pub progress_interval: Duration,
    /// Depth of each partition queue before the fetcher backpressures
    pub queue_depth: usize,
}

impl Default for PartitionedConsumerConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            consumer_name: String::new(),
            subject_filters: Vec::new(),
            batch_size: 30,
            max_wait: Duration::from_secs(5),
            partitions: 4,
            progress_interval: Duration::from_secs(10),
            queue_depth: 64,
        }
    }
}

/// Pull consumer that fans fetched messages out to a fixed set of worker
/// queues. Messages for the same device always land on the same queue, so
/// per-device arrival order is preserved; queues advance independently of
/// each other. Each message runs through a Tower service; while its future
/// is in flight the owning worker keeps extending the ack deadline so slow
/// messages do not get redelivered mid-processing.
pub struct PartitionedConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: PartitionedConsumerConfig,
    service: S,
}

impl<S> PartitionedConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: PartitionedConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subjects = ?config.subject_filters,
            partitions = config.partitions,
            "creating partitioned consumer"
        );

        let pull_config = jetstream::consumer::pull::Config {
            name: Some(config.consumer_name.clone()),
            durable_name: Some(config.consumer_name.clone()),
            filter_subjects: config.subject_filters.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(pull_config, &config.stream_name)
            .await?;

        Ok(Self {
            consumer,
            config,
            service,
        })
    }

    /// Run until cancelled. In-flight messages finish before workers exit;
    /// nothing is fetched after the token fires.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let partitions = self.config.partitions.max(1);
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            partitions,
            "starting partitioned consumer"
        );

        let mut senders = Vec::with_capacity(partitions);
        let mut workers = JoinSet::new();

        for worker_id in 0..partitions {
            let (tx, rx) = mpsc::channel::<Message>(self.config.queue_depth);
            senders.push(tx);
            workers.spawn(worker_loop(
                worker_id,
                rx,
                self.service.clone(),
                self.config.progress_interval,
            ));
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.consumer.fetch_messages(self.config.batch_size, self.config.max_wait) => {
                    match result {
                        Ok(batch) => {
                            for msg in batch {
                                let partition = partition_for(msg.subject.as_str(), partitions);
                                if senders[partition].send(msg).await.is_err() {
                                    error!(partition, "partition worker is gone, dropping message");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "error fetching batch");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        // Closing the channels lets each worker drain its queue and exit
        drop(senders);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "partition worker panicked");
            }
        }

        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "consumer stopped gracefully"
        );
        Ok(())
    }
}

/// Pick the queue for a subject. The device id segment keys the hash so one
/// device's readings stay ordered; subjects without a device segment fall
/// back to hashing the whole subject.
pub fn partition_for(subject: &str, partitions: usize) -> usize {
    let key = subject.split('.').nth(1).unwrap_or(subject);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

async fn worker_loop<S>(
    worker_id: usize,
    mut rx: mpsc::Receiver<Message>,
    mut service: S,
    progress_interval: Duration,
) where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    while let Some(msg) = rx.recv().await {
        let request = ConsumeRequest::new(
            msg.subject.to_string(),
            Bytes::copy_from_slice(&msg.payload),
            msg.headers.clone(),
        );

        let fut = service.call(request);
        tokio::pin!(fut);

        let mut progress = tokio::time::interval(progress_interval);
        // The first tick fires immediately; swallow it
        progress.tick().await;

        let result = loop {
            tokio::select! {
                res = &mut fut => break res,
                _ = progress.tick() => {
                    debug!(
                        worker = worker_id,
                        subject = %msg.subject,
                        "extending ack deadline for in-flight message"
                    );
                    if let Err(e) = msg.ack_with(AckKind::Progress).await {
                        warn!(
                            worker = worker_id,
                            subject = %msg.subject,
                            error = %e,
                            "failed to extend ack deadline"
                        );
                    }
                }
            }
        };

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    worker = worker_id,
                    subject = %msg.subject,
                    error = %e,
                    "service error processing message"
                );
                ConsumeResponse::nak(e.to_string())
            }
        };

        match response {
            ConsumeResponse::Ack => {
                if let Err(e) = msg.ack().await {
                    error!(
                        worker = worker_id,
                        subject = %msg.subject,
                        error = %e,
                        "failed to acknowledge message"
                    );
                }
            }
            ConsumeResponse::Nak(reason) => {
                warn!(
                    worker = worker_id,
                    subject = %msg.subject,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "rejecting message for redelivery"
                );
                if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                    error!(
                        worker = worker_id,
                        subject = %msg.subject,
                        error = %e,
                        "failed to reject message"
                    );
                }
            }
        }
    }

    debug!(worker = worker_id, "partition worker drained and stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::traits::{MockJetStreamConsumer, MockPullConsumer};
    use futures::future::BoxFuture;
    use std::task::{Context, Poll};

    #[derive(Clone)]
    struct AckAllService;

    impl Service<ConsumeRequest> for AckAllService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            Box::pin(async move { Ok(ConsumeResponse::ack()) })
        }
    }

    fn config() -> PartitionedConsumerConfig {
        PartitionedConsumerConfig {
            stream_name: "telemetry".to_string(),
            consumer_name: "ingest".to_string(),
            subject_filters: vec!["bike.*.*".to_string(), "bike.*.*.control".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn same_device_maps_to_same_partition() {
        let a = partition_for("bike.000001.heartrate", 4);
        let b = partition_for("bike.000001.cadence", 4);
        let c = partition_for("bike.000001.power", 4);

        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn partition_is_always_in_range() {
        for device in 0..200 {
            let subject = format!("bike.{device:06}.speed");
            assert!(partition_for(&subject, 3) < 3);
        }
    }

    #[test]
    fn subject_without_device_segment_still_partitions() {
        assert!(partition_for("malformed", 4) < 4);
    }

    #[tokio::test]
    async fn consumer_creation_success() {
        let mut mock_jetstream = MockJetStreamConsumer::new();

        mock_jetstream
            .expect_create_consumer()
            .withf(
                |config: &jetstream::consumer::pull::Config, stream_name: &str| {
                    config.durable_name.as_deref() == Some("ingest") && stream_name == "telemetry"
                },
            )
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let result =
            PartitionedConsumer::new(Arc::new(mock_jetstream), config(), AckAllService).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn consumer_creation_failure() {
        let mut mock_jetstream = MockJetStreamConsumer::new();

        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("failed to create consumer")));

        let result =
            PartitionedConsumer::new(Arc::new(mock_jetstream), config(), AckAllService).await;

        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_stops_on_cancellation_with_empty_batches() {
        let mut mock_jetstream = MockJetStreamConsumer::new();

        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| {
                let mut mock = MockPullConsumer::new();
                mock.expect_fetch_messages().returning(|_, _| Ok(vec![]));
                Ok(Box::new(mock))
            });

        let consumer = PartitionedConsumer::new(Arc::new(mock_jetstream), config(), AckAllService)
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
