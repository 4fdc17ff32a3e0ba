use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A named fixed-interval background job.
///
/// Replaces fire-and-forget timers: every tick failure is logged under the
/// job's name, and cancellation stops the loop deterministically between
/// ticks so shutdown never leaves an orphaned timer behind.
pub struct ScheduledJob {
    name: String,
    interval: Duration,
}

impl ScheduledJob {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `tick` on the configured interval until the token fires. A tick
    /// error is logged and the schedule continues; only cancellation ends
    /// the loop.
    pub async fn run<F, Fut>(self, ctx: CancellationToken, mut tick: F) -> anyhow::Result<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        info!(job = %self.name, interval_ms = self.interval.as_millis() as u64, "starting scheduled job");

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the job waits a
        // full interval before its first run
        timer.tick().await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(job = %self.name, "scheduled job cancelled");
                    break;
                }
                _ = timer.tick() => {
                    debug!(job = %self.name, "scheduled job tick");
                    if let Err(e) = tick().await {
                        error!(job = %self.name, error = %e, "scheduled job tick failed");
                    }
                }
            }
        }

        Ok(())
    }
}
