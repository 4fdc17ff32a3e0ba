use crate::protocol::{ClientEvent, SensorDataEnvelope, ServerEvent};
use crate::registry::{ConnectionRecord, ConnectionRegistry, TransportKind};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use flywheel_domain::{ControlCommand, ControlPublisher, SensorKind, TopicRouter};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared state injected into every live-client handler
#[derive(Clone)]
pub struct BridgeState {
    pub registry: Arc<ConnectionRegistry>,
    pub control: Arc<dyn ControlPublisher>,
    pub router: TopicRouter,
}

pub fn build_router(state: BridgeState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stream", get(stream_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
}

/// Serve the live-client endpoints until cancellation. Shutdown closes all
/// connections without draining pending fan-out.
pub async fn serve(
    state: BridgeState,
    bind_address: String,
    ctx: CancellationToken,
) -> anyhow::Result<()> {
    let registry = Arc::clone(&state.registry);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "bridge server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(ctx.cancelled_owned())
        .await?;

    registry.disconnect_all();
    info!("bridge server stopped");
    Ok(())
}

async fn health_handler(State(state): State<BridgeState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "connections": state.registry.len(),
    }))
}

async fn ws_handler(State(state): State<BridgeState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: BridgeState, socket: WebSocket) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let record = state.registry.connect(TransportKind::Socket, outbound_tx);

    let (mut sink, mut stream) = socket.split();

    // Push queued events out to the client
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "failed to encode outbound event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                record.touch();
                handle_client_event(&state, &record, &text).await;
            }
            Message::Ping(_) | Message::Pong(_) => record.touch(),
            Message::Close(_) => break,
            Message::Binary(_) => {
                send_or_log(&record, ServerEvent::Error {
                    message: "binary frames are not supported".to_string(),
                });
            }
        }
    }

    state.registry.disconnect(record.id);
    writer.abort();
}

async fn handle_client_event(state: &BridgeState, record: &Arc<ConnectionRecord>, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection_id = %record.id, error = %e, "unparseable client event");
            send_or_log(record, ServerEvent::Error {
                message: format!("unrecognized event: {e}"),
            });
            return;
        }
    };

    match event {
        ClientEvent::Subscribe {
            device_id,
            sensor_types,
        } => {
            let resolved: Vec<SensorKind> = sensor_types
                .iter()
                .filter_map(|name| SensorKind::from_segment(name))
                .collect();

            if resolved.len() < sensor_types.len() {
                let unknown: Vec<&String> = sensor_types
                    .iter()
                    .filter(|name| SensorKind::from_segment(name).is_none())
                    .collect();
                warn!(
                    connection_id = %record.id,
                    unknown = ?unknown,
                    "ignoring unknown sensor types in subscription"
                );
            }

            if state
                .registry
                .subscribe(record.id, &device_id, &resolved)
                .is_some()
            {
                send_or_log(record, ServerEvent::Subscribed {
                    device_id,
                    sensor_types: resolved.iter().map(|s| s.as_str().to_string()).collect(),
                });
            }
        }
        ClientEvent::PublishControl {
            device_id,
            control_type,
            value,
            command,
        } => {
            let kind = match SensorKind::from_segment(&control_type) {
                Some(kind) => kind,
                None => {
                    send_or_log(record, ServerEvent::Error {
                        message: format!("unknown control type: {control_type}"),
                    });
                    return;
                }
            };

            let control = ControlCommand::new(device_id.clone(), kind, value, command);
            let topic = state.router.control_subject(&device_id, kind);
            let payload = serde_json::to_value(&control).unwrap_or_default();

            match state.control.publish(control).await {
                Ok(()) => {
                    debug!(connection_id = %record.id, topic = %topic, "control published");
                    send_or_log(record, ServerEvent::ControlPublished { topic, payload });
                }
                Err(e) => {
                    // Surfaced only to the requesting client, never retried
                    warn!(connection_id = %record.id, error = %e, "control publish failed");
                    send_or_log(record, ServerEvent::Error {
                        message: format!("control publish failed: {e}"),
                    });
                }
            }
        }
    }
}

fn send_or_log(record: &Arc<ConnectionRecord>, event: ServerEvent) {
    if record.send(event).is_err() {
        debug!(connection_id = %record.id, "outbound channel closed");
    }
}

async fn stream_handler(
    State(state): State<BridgeState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
    let record = state.registry.connect(TransportKind::Stream, tx);

    let guard = StreamGuard {
        registry: Arc::clone(&state.registry),
        connection_id: record.id,
    };

    let stream = UnboundedReceiverStream::new(rx).filter_map(move |event| {
        // The guard rides along with the stream; dropping the response
        // removes the connection
        let _keepalive = &guard;
        let frame = match event {
            ServerEvent::SensorData(envelope) => sse_frame(&envelope),
            _ => None,
        };
        futures::future::ready(frame.map(Ok))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_frame(envelope: &SensorDataEnvelope) -> Option<Event> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            error!(error = %e, "failed to encode sse frame");
            None
        }
    }
}

struct StreamGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.disconnect(self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_domain::ports::MockControlPublisher;

    fn state_with(control: MockControlPublisher) -> BridgeState {
        BridgeState {
            registry: Arc::new(ConnectionRegistry::new()),
            control: Arc::new(control),
            router: TopicRouter::default(),
        }
    }

    #[tokio::test]
    async fn health_reports_connection_count() {
        let state = state_with(MockControlPublisher::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        state.registry.connect(TransportKind::Stream, tx);

        let Json(body) = health_handler(State(state)).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 1);
        assert!(body.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn subscribe_event_acks_with_the_resolved_set() {
        let state = state_with(MockControlPublisher::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = state.registry.connect(TransportKind::Socket, tx);

        handle_client_event(
            &state,
            &record,
            r#"{"event":"subscribe","data":{"deviceId":"000001","sensorTypes":["heartrate","nonsense","power"]}}"#,
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerEvent::Subscribed {
                device_id,
                sensor_types,
            } => {
                assert_eq!(device_id, "000001");
                assert_eq!(sensor_types, vec!["heartrate", "power"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_control_success_acks_with_topic_and_payload() {
        let mut control = MockControlPublisher::new();
        control
            .expect_publish()
            .withf(|c: &ControlCommand| {
                c.device_id == "000001" && c.unit_name == "percent" && c.value == 55.0
            })
            .times(1)
            .returning(|_| Ok(()));

        let state = state_with(control);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = state.registry.connect(TransportKind::Socket, tx);

        handle_client_event(
            &state,
            &record,
            r#"{"event":"publish_control","data":{"deviceId":"000001","controlType":"resistance","value":55,"command":"set_resistance"}}"#,
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerEvent::ControlPublished { topic, payload } => {
                assert_eq!(topic, "bike.000001.resistance.control");
                assert_eq!(payload["unitName"], "percent");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_control_failure_comes_back_as_an_error_event() {
        let mut control = MockControlPublisher::new();
        control.expect_publish().times(1).returning(|_| {
            Err(flywheel_domain::PipelineError::PublishFailed(
                "stream gone".to_string(),
            ))
        });

        let state = state_with(control);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = state.registry.connect(TransportKind::Socket, tx);

        handle_client_event(
            &state,
            &record,
            r#"{"event":"publish_control","data":{"deviceId":"000001","controlType":"fan","value":80,"command":"set_fan"}}"#,
        )
        .await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Error { message } if message.contains("control publish failed")
        ));
    }

    #[tokio::test]
    async fn unknown_control_type_is_rejected() {
        let state = state_with(MockControlPublisher::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = state.registry.connect(TransportKind::Socket, tx);

        handle_client_event(
            &state,
            &record,
            r#"{"event":"publish_control","data":{"deviceId":"000001","controlType":"warp","value":9,"command":"engage"}}"#,
        )
        .await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Error { message } if message.contains("unknown control type")
        ));
    }

    #[tokio::test]
    async fn malformed_client_event_is_rejected() {
        let state = state_with(MockControlPublisher::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let record = state.registry.connect(TransportKind::Socket, tx);

        handle_client_event(&state, &record, "garbage").await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Error { .. }
        ));
    }
}
