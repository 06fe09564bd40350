//! Relay connection types

use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::EnginePacket;

/// Unique connection identifier
pub type ConnectionId = String;

/// Capacity of each connection's outbound queue
pub const OUTBOUND_CAPACITY: usize = 128;

/// Transport a connection is using
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// WebSocket upgrade
    WebSocket,
    /// HTTP long-polling fallback
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "websocket" => Some(TransportKind::WebSocket),
            "polling" => Some(TransportKind::Polling),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata about a connection
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the handshake completed
    pub connected_at: chrono::DateTime<chrono::Utc>,
    /// Relay instance ID
    pub instance_id: String,
    /// Client IP address (if available)
    pub client_ip: Option<String>,
    /// User agent (if available)
    pub user_agent: Option<String>,
    /// Transport used for the handshake
    pub transport: TransportKind,
}

/// Why an enqueue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Client is not draining its queue
    Full,
    /// Transport has gone away
    Closed,
}

/// Handle to one live client connection
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Sender for pushing packets to the transport
    pub sender: mpsc::Sender<EnginePacket>,
    /// Connection metadata
    pub metadata: ConnectionMetadata,
}

impl Connection {
    /// Create a new connection with a fresh ID
    pub fn new(
        instance_id: impl Into<String>,
        transport: TransportKind,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> (Self, mpsc::Receiver<EnginePacket>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_CAPACITY);
        let connection = Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            metadata: ConnectionMetadata {
                connected_at: chrono::Utc::now(),
                instance_id: instance_id.into(),
                client_ip,
                user_agent,
                transport,
            },
        };
        (connection, receiver)
    }

    /// Check if the transport side is still receiving
    pub fn is_active(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a packet without waiting
    pub fn try_send(&self, packet: EnginePacket) -> Result<(), SendFailure> {
        self.sender.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}
