use crate::protocol::{SensorDataEnvelope, ServerEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flywheel_domain::SensorKind;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a live client is attached to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bidirectional socket; receives only rooms it joined
    Socket,
    /// One-way event stream; receives every message
    Stream,
}

/// Routing key matching fan-out messages to interested subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub device_id: String,
    pub sensor: SensorKind,
}

/// One live client connection.
///
/// Lifecycle: created on connect, gains rooms on subscribe, refreshes its
/// activity timestamp on every delivery or inbound event, and is removed on
/// disconnect or by the idle reaper, whichever comes first. Removal is
/// terminal.
pub struct ConnectionRecord {
    pub id: Uuid,
    pub transport: TransportKind,
    pub connected_at: DateTime<Utc>,
    last_activity_millis: AtomicI64,
    rooms: RwLock<HashSet<RoomKey>>,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionRecord {
    fn new(transport: TransportKind, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transport,
            connected_at: now,
            last_activity_millis: AtomicI64::new(now.timestamp_millis()),
            rooms: RwLock::new(HashSet::new()),
            sender,
        }
    }

    /// Refresh the activity timestamp
    pub fn touch(&self) {
        self.last_activity_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let idle_millis =
            (now.timestamp_millis() - self.last_activity_millis.load(Ordering::Relaxed)).max(0);
        Duration::from_millis(idle_millis as u64)
    }

    pub fn is_subscribed(&self, room: &RoomKey) -> bool {
        self.rooms.read().expect("rooms lock poisoned").contains(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().expect("rooms lock poisoned").len()
    }

    /// Queue an event for this connection's transport. Fails once the
    /// transport side has gone away.
    pub fn send(&self, event: ServerEvent) -> Result<(), ()> {
        self.sender.send(event).map_err(|_| ())
    }

    fn join_rooms(&self, rooms: impl IntoIterator<Item = RoomKey>) {
        let mut guard = self.rooms.write().expect("rooms lock poisoned");
        guard.extend(rooms);
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, by: Duration) {
        let millis = Utc::now().timestamp_millis() - by.as_millis() as i64;
        self.last_activity_millis.store(millis, Ordering::Relaxed);
    }
}

/// Shared registry of live connections.
///
/// Touched from three directions at once: the broker consumption path fans
/// messages out, client handlers connect/subscribe/disconnect, and the
/// reaper sweeps. The map is concurrency-safe and fan-out iterates over a
/// snapshot, so removal during delivery never invalidates the iteration.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and hand back its record
    pub fn connect(
        &self,
        transport: TransportKind,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<ConnectionRecord> {
        let record = Arc::new(ConnectionRecord::new(transport, sender));
        self.connections.insert(record.id, Arc::clone(&record));
        info!(
            connection_id = %record.id,
            transport = ?record.transport,
            total = self.connections.len(),
            "client connected"
        );
        record
    }

    /// Join the given rooms for a connection. Returns the resolved room set
    /// or None when the connection is unknown (already reaped or closed).
    pub fn subscribe(
        &self,
        connection_id: Uuid,
        device_id: &str,
        sensors: &[SensorKind],
    ) -> Option<Vec<RoomKey>> {
        let record = self.connections.get(&connection_id)?;

        let rooms: Vec<RoomKey> = sensors
            .iter()
            .map(|sensor| RoomKey {
                device_id: device_id.to_string(),
                sensor: *sensor,
            })
            .collect();

        record.join_rooms(rooms.iter().cloned());
        record.touch();

        debug!(
            connection_id = %connection_id,
            device_id = %device_id,
            rooms = rooms.len(),
            "client subscribed"
        );

        Some(rooms)
    }

    /// Remove a connection immediately. Returns false when it was already
    /// gone.
    pub fn disconnect(&self, connection_id: Uuid) -> bool {
        let removed = self.connections.remove(&connection_id).is_some();
        if removed {
            info!(
                connection_id = %connection_id,
                total = self.connections.len(),
                "client disconnected"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver an envelope to every stream connection and every socket
    /// connection subscribed to the room. Recipients get their activity
    /// refreshed; connections whose transport has gone away are dropped
    /// from the registry. Returns the number of deliveries.
    pub fn deliver(&self, room: &RoomKey, envelope: &SensorDataEnvelope) -> usize {
        // Snapshot so concurrent connects/disconnects cannot disturb the sweep
        let snapshot: Vec<Arc<ConnectionRecord>> =
            self.connections.iter().map(|e| Arc::clone(e.value())).collect();

        let mut delivered = 0;
        for record in snapshot {
            let wants_it = match record.transport {
                TransportKind::Stream => true,
                TransportKind::Socket => record.is_subscribed(room),
            };
            if !wants_it {
                continue;
            }

            match record.send(ServerEvent::SensorData(envelope.clone())) {
                Ok(()) => {
                    record.touch();
                    delivered += 1;
                }
                Err(()) => {
                    warn!(connection_id = %record.id, "transport gone, removing connection");
                    self.connections.remove(&record.id);
                }
            }
        }

        delivered
    }

    /// Remove every connection idle longer than the threshold. Returns the
    /// ids that were reaped.
    pub fn reap_idle(&self, idle_threshold: Duration, now: DateTime<Utc>) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|e| e.value().idle_for(now) > idle_threshold)
            .map(|e| *e.key())
            .collect();

        for id in &stale {
            self.connections.remove(id);
            info!(connection_id = %id, "reaped idle connection");
        }

        stale
    }

    /// Drop every connection at once. Used on shutdown; pending fan-out is
    /// not drained.
    pub fn disconnect_all(&self) {
        let count = self.connections.len();
        self.connections.clear();
        if count > 0 {
            info!(count, "closed all live connections");
        }
    }
}
