use crate::protocol::SensorDataEnvelope;
use crate::registry::{ConnectionRegistry, RoomKey};
use chrono::Utc;
use common::nats::{ConsumeRequest, ConsumeResponse};
use flywheel_domain::TopicRouter;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, trace};

/// Tower service behind the bridge's own consumer. Each consumed reading is
/// wrapped in a client envelope and delivered to the room's subscribers and
/// every stream connection.
///
/// Always acknowledges: fan-out is an observer of the data stream, and a
/// reading nobody is subscribed to has no redelivery value.
#[derive(Clone)]
pub struct FanoutService {
    registry: Arc<ConnectionRegistry>,
    router: TopicRouter,
}

impl FanoutService {
    pub fn new(registry: Arc<ConnectionRegistry>, router: TopicRouter) -> Self {
        Self { registry, router }
    }
}

impl Service<ConsumeRequest> for FanoutService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let registry = Arc::clone(&self.registry);
        let router = self.router.clone();

        Box::pin(async move {
            let parsed = match router.parse(&req.subject) {
                Ok(parsed) if !parsed.is_control => parsed,
                Ok(_) => {
                    trace!(subject = %req.subject, "control subject, nothing to fan out");
                    return Ok(ConsumeResponse::ack());
                }
                Err(e) => {
                    debug!(subject = %req.subject, error = %e, "unroutable subject, skipping");
                    return Ok(ConsumeResponse::ack());
                }
            };

            let data = serde_json::from_slice(&req.payload).unwrap_or_else(
                |_| serde_json::Value::String(String::from_utf8_lossy(&req.payload).into_owned()),
            );

            let envelope = SensorDataEnvelope {
                topic: req.subject.clone(),
                device_id: parsed.device_id.clone(),
                device_type: parsed.sensor.as_str().to_string(),
                is_report: false,
                data,
                received_at: Utc::now(),
            };

            let room = RoomKey {
                device_id: parsed.device_id,
                sensor: parsed.sensor,
            };

            let delivered = registry.deliver(&room, &envelope);
            trace!(
                subject = %req.subject,
                delivered,
                "fanned out reading"
            );

            Ok(ConsumeResponse::ack())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerEvent;
    use crate::registry::TransportKind;
    use bytes::Bytes;
    use flywheel_domain::SensorKind;
    use tokio::sync::mpsc;

    fn request(subject: &str, payload: &str) -> ConsumeRequest {
        ConsumeRequest::new(subject.to_string(), Bytes::from(payload.to_string()), None)
    }

    #[tokio::test]
    async fn subscribed_socket_receives_the_envelope() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = registry.connect(TransportKind::Socket, tx);
        registry
            .subscribe(record.id, "000001", &[SensorKind::HeartRate])
            .unwrap();

        let mut service = FanoutService::new(Arc::clone(&registry), TopicRouter::default());

        let response = service
            .call(request(
                "bike.000001.heartrate",
                r#"{"value": 75, "unitName": "bpm"}"#,
            ))
            .await
            .unwrap();

        assert!(response.is_ack());
        match rx.try_recv().unwrap() {
            ServerEvent::SensorData(envelope) => {
                assert_eq!(envelope.topic, "bike.000001.heartrate");
                assert_eq!(envelope.device_type, "heartrate");
                assert_eq!(envelope.data["value"], 75);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribed_socket_receives_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = registry.connect(TransportKind::Socket, tx);
        registry
            .subscribe(record.id, "000001", &[SensorKind::Cadence])
            .unwrap();

        let mut service = FanoutService::new(Arc::clone(&registry), TopicRouter::default());

        service
            .call(request("bike.000001.heartrate", r#"{"value": 75}"#))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unroutable_subjects_ack_without_delivery() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.connect(TransportKind::Stream, tx);

        let mut service = FanoutService::new(Arc::clone(&registry), TopicRouter::default());

        let response = service
            .call(request("bike.000001.barometer", r#"{"value": 1}"#))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_json_payload_is_forwarded_as_text() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.connect(TransportKind::Stream, tx);

        let mut service = FanoutService::new(Arc::clone(&registry), TopicRouter::default());

        service
            .call(request("bike.000001.power", "not json"))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::SensorData(envelope) => {
                assert_eq!(envelope.data, serde_json::Value::from("not json"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
