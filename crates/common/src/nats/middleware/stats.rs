use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Knobs for the consumption stats layer.
#[derive(Debug, Clone)]
pub struct ConsumeStatsConfig {
    /// Emit a throughput line once every this many completed messages
    pub log_every: u64,
    /// Warn when a single message takes longer than this to process
    pub slow_threshold: Duration,
}

impl Default for ConsumeStatsConfig {
    fn default() -> Self {
        Self {
            log_every: 100,
            slow_threshold: Duration::from_millis(1000),
        }
    }
}

#[derive(Default)]
struct ConsumeStats {
    completed: AtomicU64,
    total_millis: AtomicU64,
}

/// Tower layer tracking per-message latency across all clones of the
/// wrapped service. Counters are shared so partitioned workers report
/// into one running average.
#[derive(Clone)]
pub struct ConsumeStatsLayer {
    config: ConsumeStatsConfig,
    stats: Arc<ConsumeStats>,
}

impl ConsumeStatsLayer {
    pub fn new(config: ConsumeStatsConfig) -> Self {
        Self {
            config,
            stats: Arc::new(ConsumeStats::default()),
        }
    }
}

impl Default for ConsumeStatsLayer {
    fn default() -> Self {
        Self::new(ConsumeStatsConfig::default())
    }
}

impl<S> Layer<S> for ConsumeStatsLayer {
    type Service = ConsumeStatsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ConsumeStatsService {
            inner: service,
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Clone)]
pub struct ConsumeStatsService<S> {
    inner: S,
    config: ConsumeStatsConfig,
    stats: Arc<ConsumeStats>,
}

impl<S> Service<ConsumeRequest> for ConsumeStatsService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let start = Instant::now();
        let mut inner = self.inner.clone();
        let config = self.config.clone();
        let stats = Arc::clone(&self.stats);

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let elapsed = start.elapsed();
                let elapsed_ms = elapsed.as_millis() as u64;

                match &result {
                    Ok(response) => {
                        let completed = stats.completed.fetch_add(1, Ordering::Relaxed) + 1;
                        let total = stats.total_millis.fetch_add(elapsed_ms, Ordering::Relaxed)
                            + elapsed_ms;

                        if elapsed > config.slow_threshold {
                            warn!(
                                subject = %subject,
                                duration_ms = elapsed_ms,
                                threshold_ms = config.slow_threshold.as_millis() as u64,
                                "slow message processing"
                            );
                        }

                        if completed % config.log_every == 0 {
                            let avg_ms = total / completed;
                            info!(
                                completed = completed,
                                avg_duration_ms = avg_ms,
                                outcome = if response.is_ack() { "ack" } else { "nak" },
                                "processing throughput checkpoint"
                            );
                        }
                    }
                    Err(e) => {
                        error!(
                            subject = %subject,
                            duration_ms = elapsed_ms,
                            error = %e,
                            "message consumption failed"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
