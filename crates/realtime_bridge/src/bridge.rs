use crate::fanout::FanoutService;
use crate::registry::ConnectionRegistry;
use crate::server::{serve, BridgeState};
use chrono::Utc;
use common::nats::{NatsClient, PartitionedConsumer, PartitionedConsumerConfig};
use common::ScheduledJob;
use flywheel_domain::TopicRouter;
use flywheel_nats::NatsControlPublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct RealtimeBridgeConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub topic_namespace: String,
    pub bind_address: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
    /// How often the reaper sweeps for stale connections
    pub reap_interval_secs: u64,
    /// Idle time after which a connection is reaped
    pub idle_timeout_secs: u64,
}

type RunnerProcess = Box<
    dyn FnOnce(
            CancellationToken,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

/// The distribution bridge: a consumer fanning readings out to live
/// clients, the client-facing server, and the idle-connection reaper. All
/// three share one connection registry.
pub struct RealtimeBridge {
    registry: Arc<ConnectionRegistry>,
    consumer: PartitionedConsumer<FanoutService>,
    state: BridgeState,
    config: RealtimeBridgeConfig,
}

impl RealtimeBridge {
    pub async fn new(
        nats_client: Arc<NatsClient>,
        config: RealtimeBridgeConfig,
    ) -> anyhow::Result<Self> {
        info!("initializing realtime bridge");

        let registry = Arc::new(ConnectionRegistry::new());
        let router = TopicRouter::new(&config.topic_namespace);

        let consumer = PartitionedConsumer::new(
            nats_client.create_consumer_client(),
            PartitionedConsumerConfig {
                stream_name: config.stream_name.clone(),
                consumer_name: config.consumer_name.clone(),
                subject_filters: vec![router.data_subject_filter()],
                batch_size: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
                partitions: 2,
                progress_interval: Duration::from_secs(10),
                queue_depth: 64,
            },
            FanoutService::new(Arc::clone(&registry), router.clone()),
        )
        .await?;

        let control = Arc::new(NatsControlPublisher::new(
            nats_client.create_publisher_client(),
            router.clone(),
        ));

        let state = BridgeState {
            registry: Arc::clone(&registry),
            control,
            router,
        };

        info!("realtime bridge initialized");

        Ok(Self {
            registry,
            consumer,
            state,
            config,
        })
    }

    /// Split the bridge into its three long-running processes
    pub fn into_runner_processes(self) -> Vec<(&'static str, RunnerProcess)> {
        let reaper = ScheduledJob::new(
            "connection-reaper",
            Duration::from_secs(self.config.reap_interval_secs),
        );
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let reaper_registry = Arc::clone(&self.registry);

        let consumer = self.consumer;
        let state = self.state;
        let bind_address = self.config.bind_address.clone();

        vec![
            (
                "bridge_fanout",
                Box::new(move |ctx: CancellationToken| {
                    Box::pin(async move { consumer.run(ctx).await })
                }),
            ),
            (
                "bridge_server",
                Box::new(move |ctx: CancellationToken| {
                    Box::pin(async move { serve(state, bind_address, ctx).await })
                }),
            ),
            (
                "bridge_reaper",
                Box::new(move |ctx: CancellationToken| {
                    Box::pin(async move {
                        reaper
                            .run(ctx, move || {
                                let registry = Arc::clone(&reaper_registry);
                                async move {
                                    let reaped = registry.reap_idle(idle_timeout, Utc::now());
                                    if !reaped.is_empty() {
                                        debug!(count = reaped.len(), "reaper sweep removed connections");
                                    }
                                    Ok(())
                                }
                            })
                            .await
                    })
                }),
            ),
        ]
    }
}
