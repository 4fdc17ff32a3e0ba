use crate::nats::ReadingConsumerService;
use common::nats::{
    ConsumeStatsConfig, ConsumeStatsLayer, ConsumeStatsService, NatsClient, PartitionedConsumer,
    PartitionedConsumerConfig,
};
use common::ClickHouseClient;
use flywheel_clickhouse::ClickHouseTelemetryRepository;
use flywheel_domain::{ReadingPipelineService, RetryPolicy, TopicRouter};
use flywheel_nats::{NatsDeadLetterSink, NatsMetricsSink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub struct IngestWorkerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub topic_namespace: String,
    pub telemetry_table: String,
    pub metrics_subject: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
    pub partitions: usize,
    pub progress_interval_secs: u64,
    pub retry: RetryPolicy,
}

type IngestService = ConsumeStatsService<ReadingConsumerService>;

/// The telemetry ingestion module: wires the reading pipeline behind a
/// partitioned consumer on the data subjects.
pub struct IngestWorker {
    consumer: PartitionedConsumer<IngestService>,
}

impl IngestWorker {
    pub async fn new(
        nats_client: Arc<NatsClient>,
        clickhouse_client: ClickHouseClient,
        config: IngestWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!("initializing ingest worker");

        let router = TopicRouter::new(&config.topic_namespace);

        let repository = Arc::new(ClickHouseTelemetryRepository::new(
            clickhouse_client,
            config.telemetry_table.clone(),
        ));
        let dead_letters = Arc::new(NatsDeadLetterSink::new(
            nats_client.create_publisher_client(),
        ));
        let metrics = Arc::new(NatsMetricsSink::new(
            nats_client.create_core_publisher(),
            config.metrics_subject.clone(),
        ));

        let pipeline = Arc::new(ReadingPipelineService::new(
            router.clone(),
            repository,
            dead_letters,
            metrics,
            config.retry.clone(),
        ));

        let service = ServiceBuilder::new()
            .layer(ConsumeStatsLayer::new(ConsumeStatsConfig::default()))
            .service(ReadingConsumerService::new(pipeline));

        let consumer = PartitionedConsumer::new(
            nats_client.create_consumer_client(),
            PartitionedConsumerConfig {
                stream_name: config.stream_name.clone(),
                consumer_name: config.consumer_name.clone(),
                subject_filters: vec![
                    router.data_subject_filter(),
                    router.control_subject_filter(),
                ],
                batch_size: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
                partitions: config.partitions,
                progress_interval: Duration::from_secs(config.progress_interval_secs),
                queue_depth: 64,
            },
            service,
        )
        .await?;

        info!("ingest worker initialized");

        Ok(Self { consumer })
    }

    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        let consumer = self.consumer;
        Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
    }
}
