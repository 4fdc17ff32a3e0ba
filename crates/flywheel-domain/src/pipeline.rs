use crate::error::{DeadLetterKind, PipelineResult};
use crate::ports::{DeadLetterSink, MetricsSink, TelemetryRepository};
use crate::reading::{DeadLetterRecord, ProcessingMetrics, RawReading};
use crate::retry::RetryPolicy;
use crate::topic::TopicRouter;
use crate::validator::{should_drop, validate};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Terminal state of one message's pipeline pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Persisted {
        message_id: Uuid,
        quality_score: u8,
        anomaly_detected: bool,
    },
    DeadLettered {
        kind: DeadLetterKind,
    },
    /// Control-subject delivery: acknowledged, intentionally not processed
    ControlSkipped,
}

/// Domain service that takes one raw broker message through the full
/// ingestion pipeline.
///
/// Flow:
/// 1. Parse the subject into device id + sensor type
/// 2. Score and normalize the payload
/// 3. Drop invalid low-quality readings to the dead-letter channel
/// 4. Persist with bounded, jittered retry
/// 5. Emit processing metrics (fire-and-forget)
///
/// Every failure ends in exactly one dead-letter record; every success ends
/// in exactly one stored row. The two never overlap.
pub struct ReadingPipelineService {
    router: TopicRouter,
    repository: Arc<dyn TelemetryRepository>,
    dead_letters: Arc<dyn DeadLetterSink>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryPolicy,
}

impl ReadingPipelineService {
    pub fn new(
        router: TopicRouter,
        repository: Arc<dyn TelemetryRepository>,
        dead_letters: Arc<dyn DeadLetterSink>,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            router,
            repository,
            dead_letters,
            metrics,
            retry,
        }
    }

    #[instrument(skip(self, payload, headers), fields(subject = %subject))]
    pub async fn process(
        &self,
        subject: &str,
        payload: &[u8],
        headers: BTreeMap<String, String>,
    ) -> PipelineResult<PipelineOutcome> {
        let received_at = Utc::now();
        let started = Instant::now();

        let parsed = match self.router.parse(subject) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unrecognized topic");
                self.dead_letter(
                    subject,
                    payload,
                    &headers,
                    DeadLetterKind::InvalidTopicFormat,
                    e.to_string(),
                    None,
                )
                .await;
                return Ok(PipelineOutcome::DeadLettered {
                    kind: DeadLetterKind::InvalidTopicFormat,
                });
            }
        };

        if parsed.is_control {
            debug!(
                device_id = %parsed.device_id,
                sensor = %parsed.sensor,
                "control subject delivery, skipping"
            );
            return Ok(PipelineOutcome::ControlSkipped);
        }

        let raw: RawReading = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "payload is not well-formed JSON");
                self.dead_letter(
                    subject,
                    payload,
                    &headers,
                    DeadLetterKind::JsonParse,
                    e.to_string(),
                    None,
                )
                .await;
                return Ok(PipelineOutcome::DeadLettered {
                    kind: DeadLetterKind::JsonParse,
                });
            }
        };

        let reading = validate(&parsed.device_id, parsed.sensor, raw, received_at);

        if should_drop(&reading) {
            warn!(
                device_id = %reading.device_id,
                sensor = %reading.sensor,
                quality_score = reading.quality_score,
                errors = ?reading.validation_errors,
                "dropping reading below quality floor"
            );
            let context = serde_json::to_value(&reading).ok();
            self.dead_letter(
                subject,
                payload,
                &headers,
                DeadLetterKind::Validation,
                reading.validation_errors.join("; "),
                context,
            )
            .await;
            return Ok(PipelineOutcome::DeadLettered {
                kind: DeadLetterKind::Validation,
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.repository.insert_reading(&reading).await {
                Ok(()) => break,
                Err(e) if attempts >= self.retry.max_attempts => {
                    error!(
                        device_id = %reading.device_id,
                        attempts,
                        error = %e,
                        "persistence exhausted all attempts"
                    );
                    let context = serde_json::to_value(&reading).ok();
                    self.dead_letter(
                        subject,
                        payload,
                        &headers,
                        DeadLetterKind::DatabaseSave,
                        e.to_string(),
                        context,
                    )
                    .await;
                    return Ok(PipelineOutcome::DeadLettered {
                        kind: DeadLetterKind::DatabaseSave,
                    });
                }
                Err(e) => {
                    let delay = self.retry.backoff_delay(attempts);
                    warn!(
                        device_id = %reading.device_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "insert failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let metrics = ProcessingMetrics {
            device_id: reading.device_id.clone(),
            device_type: reading.sensor,
            message_id: reading.message_id,
            quality_score: reading.quality_score,
            processing_time: started.elapsed().as_millis() as u64,
            anomaly_detected: reading.anomaly_detected,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.metrics.publish(metrics).await {
            // Metrics must never fail the pipeline
            debug!(error = %e, "metrics publish failed, ignoring");
        }

        debug!(
            device_id = %reading.device_id,
            sensor = %reading.sensor,
            message_id = %reading.message_id,
            quality_score = reading.quality_score,
            "reading persisted"
        );

        Ok(PipelineOutcome::Persisted {
            message_id: reading.message_id,
            quality_score: reading.quality_score,
            anomaly_detected: reading.anomaly_detected,
        })
    }

    /// Publish one failure record. A failed publish is logged and dropped,
    /// never retried, so a broken failure channel cannot amplify itself.
    pub async fn dead_letter(
        &self,
        subject: &str,
        payload: &[u8],
        headers: &BTreeMap<String, String>,
        kind: DeadLetterKind,
        message: String,
        context: Option<Value>,
    ) {
        let record = DeadLetterRecord::new(subject, payload, headers.clone(), kind, message, context);
        if let Err(e) = self.dead_letters.publish(record).await {
            error!(
                subject = %subject,
                error_type = kind.as_wire(),
                error = %e,
                "failed to publish dead letter, dropping"
            );
        }
    }
}
