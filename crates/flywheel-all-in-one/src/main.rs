mod config;

use common::clickhouse::ClickHouseClient;
use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use flywheel_domain::{RetryPolicy, TopicRouter};
use flywheel_runner::Runner;
use ingest_worker::{IngestWorker, IngestWorkerConfig};
use realtime_bridge::{RealtimeBridge, RealtimeBridgeConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("failed to initialize telemetry: {e}");
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        namespace = %config.topic_namespace,
        "starting flywheel-all-in-one service"
    );
    debug!("configuration: {config:?}");

    let (clickhouse_client, nats_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("failed to initialize shared dependencies: {e}");
            std::process::exit(1);
        }
    };

    let ingest_worker = match IngestWorker::new(
        Arc::clone(&nats_client),
        clickhouse_client,
        IngestWorkerConfig {
            stream_name: config.telemetry_stream.clone(),
            consumer_name: config.ingest_consumer_name.clone(),
            topic_namespace: config.topic_namespace.clone(),
            telemetry_table: config.telemetry_table.clone(),
            metrics_subject: config.metrics_subject.clone(),
            batch_size: config.nats_batch_size,
            batch_wait_secs: config.nats_batch_wait_secs,
            partitions: config.ingest_partitions,
            progress_interval_secs: config.progress_interval_secs,
            retry: RetryPolicy {
                max_attempts: config.persist_max_attempts,
                base_delay: Duration::from_millis(config.persist_base_delay_ms),
                max_jitter: Duration::from_millis(config.persist_max_jitter_ms),
            },
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to initialize ingest worker: {e}");
            std::process::exit(1);
        }
    };

    let bridge = match RealtimeBridge::new(
        Arc::clone(&nats_client),
        RealtimeBridgeConfig {
            stream_name: config.telemetry_stream.clone(),
            consumer_name: config.bridge_consumer_name.clone(),
            topic_namespace: config.topic_namespace.clone(),
            bind_address: config.bridge_bind_address.clone(),
            batch_size: config.nats_batch_size,
            batch_wait_secs: config.nats_batch_wait_secs,
            reap_interval_secs: config.reap_interval_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        },
    )
    .await
    {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("failed to initialize realtime bridge: {e}");
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();

    runner = runner.with_named_process("ingest_worker", ingest_worker.into_runner_process());

    for (name, process) in bridge.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer({
            let nats_for_close = Arc::clone(&nats_client);
            move || {
                Box::pin(async move {
                    info!("running cleanup tasks");
                    if let Ok(client) = Arc::try_unwrap(nats_for_close) {
                        client.close().await;
                    }

                    shutdown_telemetry(telemetry_providers);

                    info!("cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(ClickHouseClient, Arc<NatsClient>)> {
    info!("initializing ClickHouse");
    let clickhouse_client = ClickHouseClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    clickhouse_client.ping().await?;

    info!("initializing NATS");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );

    // One stream covers data, control, and dead-letter subjects; metrics go
    // over core NATS and need no stream
    let router = TopicRouter::new(&config.topic_namespace);
    nats_client
        .ensure_stream(&config.telemetry_stream, vec![router.all_subjects()])
        .await?;

    Ok((clickhouse_client, nats_client))
}
