//! Connection Manager: session lifecycle, heartbeat and cleanup

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionId, TransportKind};
use crate::protocol::EnginePacket;
use crate::registry::RoomRegistry;

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Engine.IO close packet
    ClientClose,
    /// Socket.IO disconnect packet
    ClientDisconnect,
    /// Transport closed or errored
    TransportClose,
    /// No packet within ping interval + ping timeout
    PingTimeout,
    /// Server is shutting down
    ServerShutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClose => "client close",
            DisconnectReason::ClientDisconnect => "client namespace disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::ServerShutdown => "server shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine.IO session wrapping one connection
pub struct Session {
    pub connection: Connection,
    /// Outbound packets, drained by the active transport
    pub receiver: Mutex<mpsc::Receiver<EnginePacket>>,
    /// Cancelled when the session is unregistered
    pub closed: CancellationToken,
    socket_connected: AtomicBool,
    upgraded: AtomicBool,
    last_seen_ms: AtomicI64,
}

impl Session {
    fn new(connection: Connection, receiver: mpsc::Receiver<EnginePacket>) -> Self {
        Self {
            connection,
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
            socket_connected: AtomicBool::new(false),
            upgraded: AtomicBool::new(false),
            last_seen_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.connection.id
    }

    /// Record inbound activity
    pub fn touch(&self) {
        self.last_seen_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let idle = chrono::Utc::now().timestamp_millis() - self.last_seen_ms.load(Ordering::Relaxed);
        Duration::from_millis(idle.max(0) as u64)
    }

    /// Mark the default namespace as connected. Returns false if it already was.
    pub fn connect_socket(&self) -> bool {
        !self.socket_connected.swap(true, Ordering::SeqCst)
    }

    pub fn is_socket_connected(&self) -> bool {
        self.socket_connected.load(Ordering::SeqCst)
    }

    /// Switch the session from polling to WebSocket
    pub fn mark_upgraded(&self) {
        self.upgraded.store(true, Ordering::SeqCst);
    }

    pub fn transport(&self) -> TransportKind {
        if self.upgraded.load(Ordering::SeqCst) {
            TransportKind::WebSocket
        } else {
            self.connection.metadata.transport
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Manages all live sessions on this instance
#[derive(Clone)]
pub struct ConnectionManager {
    /// All active sessions: connection_id -> session
    sessions: Arc<DashMap<ConnectionId, Arc<Session>>>,
    registry: RoomRegistry,
    instance_id: String,
}

impl ConnectionManager {
    pub fn new(instance_id: impl Into<String>, registry: RoomRegistry) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            registry,
            instance_id: instance_id.into(),
        }
    }

    /// Register a new connection after a successful handshake
    pub fn register(
        &self,
        transport: TransportKind,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Arc<Session> {
        let (connection, receiver) =
            Connection::new(self.instance_id.clone(), transport, client_ip, user_agent);
        let session = Arc::new(Session::new(connection, receiver));

        self.sessions
            .insert(session.id().to_string(), session.clone());

        info!(
            connection_id = %session.id(),
            transport = %transport,
            client_ip = ?session.connection.metadata.client_ip,
            total_connections = self.sessions.len(),
            "Connection established"
        );
        session
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(connection_id).map(|s| s.value().clone())
    }

    /// Tear down a session and drop all its room memberships
    pub fn unregister(&self, connection_id: &str, reason: DisconnectReason) {
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            session.closed.cancel();
            let rooms = self.registry.leave_all(connection_id);
            info!(
                connection_id,
                reason = %reason,
                rooms_left = rooms.len(),
                remaining_connections = self.sessions.len(),
                "Connection closed"
            );
        }
    }

    /// Queue an Engine.IO ping on every session
    pub fn send_heartbeat(&self) {
        for entry in self.sessions.iter() {
            if entry.connection.try_send(EnginePacket::Ping(None)).is_err() {
                debug!(connection_id = %entry.key(), "Heartbeat not queued");
            }
        }
    }

    /// Unregister sessions that sent nothing for longer than `timeout`
    pub fn cleanup_dead_connections(&self, timeout: Duration) -> usize {
        let dead: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_for() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let count = dead.len();
        for id in dead {
            self.unregister(&id, DisconnectReason::PingTimeout);
        }
        count
    }

    /// Close every session
    pub fn close_all(&self, reason: DisconnectReason) {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(session) = self.get(&id) {
                let _ = session.connection.try_send(EnginePacket::Close);
            }
            self.unregister(&id, reason);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
