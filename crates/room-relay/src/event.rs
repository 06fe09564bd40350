//! Relay event types
//!
//! Inbound events are parsed into [`ClientEvent`] at the boundary. Payloads of
//! broadcast events are kept verbatim and forwarded unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{EnginePacket, SocketPacket};

/// Kind of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Task board of a project
    Project,
    /// Chat conversation
    Chat,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Project => "project",
            RoomKind::Chat => "chat",
        }
    }
}

/// A logical broadcast scope, rendered as `<kind>:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Room {
    kind: RoomKind,
    id: String,
}

impl Room {
    /// Room of a project board
    pub fn project(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Project,
            id: id.into(),
        }
    }

    /// Room of a chat
    pub fn chat(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Chat,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Room {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| EventError::InvalidRoom(s.to_string()))?;
        if id.is_empty() {
            return Err(EventError::InvalidRoom(s.to_string()));
        }
        match kind {
            "project" => Ok(Room::project(id)),
            "chat" => Ok(Room::chat(id)),
            _ => Err(EventError::InvalidRoom(s.to_string())),
        }
    }
}

impl From<Room> for String {
    fn from(room: Room) -> Self {
        room.to_string()
    }
}

impl TryFrom<String> for Room {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Reasons an inbound event is dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event `{event}` is missing a usable `{field}` field")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    #[error("event `{event}` expects a string or numeric identifier")]
    InvalidIdentifier { event: &'static str },

    #[error("invalid room name `{0}`")]
    InvalidRoom(String),
}

/// Names of the broadcast events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastKind {
    TaskMoved,
    TaskUpdated,
    TaskCreated,
    TaskDeleted,
    ChatMessage,
}

impl BroadcastKind {
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastKind::TaskMoved => "task-moved",
            BroadcastKind::TaskUpdated => "task-updated",
            BroadcastKind::TaskCreated => "task-created",
            BroadcastKind::TaskDeleted => "task-deleted",
            BroadcastKind::ChatMessage => "chat-message",
        }
    }

    fn scope_field(&self) -> &'static str {
        match self {
            BroadcastKind::ChatMessage => "chatId",
            _ => "projectId",
        }
    }

    fn room(&self, id: String) -> Room {
        match self {
            BroadcastKind::ChatMessage => Room::chat(id),
            _ => Room::project(id),
        }
    }
}

/// A validated event received from a client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// `join-project` / `join-chat`
    Join(Room),
    /// `leave-project`
    Leave(Room),
    /// One of the task or chat events, forwarded verbatim to `room`
    Broadcast {
        kind: BroadcastKind,
        room: Room,
        payload: Value,
    },
}

impl ClientEvent {
    /// Parse an event name and its first argument.
    ///
    /// Returns `Ok(None)` for names outside the relay vocabulary.
    pub fn parse(name: &str, payload: Value) -> Result<Option<Self>, EventError> {
        let event = match name {
            "join-project" => {
                ClientEvent::Join(Room::project(identifier("join-project", &payload)?))
            }
            "leave-project" => {
                ClientEvent::Leave(Room::project(identifier("leave-project", &payload)?))
            }
            "join-chat" => ClientEvent::Join(Room::chat(identifier("join-chat", &payload)?)),
            "task-moved" => Self::broadcast(BroadcastKind::TaskMoved, payload)?,
            "task-updated" => Self::broadcast(BroadcastKind::TaskUpdated, payload)?,
            "task-created" => Self::broadcast(BroadcastKind::TaskCreated, payload)?,
            "task-deleted" => Self::broadcast(BroadcastKind::TaskDeleted, payload)?,
            "chat-message" => Self::broadcast(BroadcastKind::ChatMessage, payload)?,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn broadcast(kind: BroadcastKind, payload: Value) -> Result<Self, EventError> {
        let field = kind.scope_field();
        let id = payload
            .get(field)
            .and_then(scalar_id)
            .ok_or(EventError::MissingField {
                event: kind.name(),
                field,
            })?;
        Ok(ClientEvent::Broadcast {
            kind,
            room: kind.room(id),
            payload,
        })
    }

    /// Event name as seen on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(room) if room.kind() == RoomKind::Chat => "join-chat",
            ClientEvent::Join(_) => "join-project",
            ClientEvent::Leave(_) => "leave-project",
            ClientEvent::Broadcast { kind, .. } => kind.name(),
        }
    }
}

fn identifier(event: &'static str, payload: &Value) -> Result<String, EventError> {
    scalar_id(payload).ok_or(EventError::InvalidIdentifier { event })
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Event delivered to room members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Same name as received
    pub name: String,
    /// Payload forwarded unchanged
    pub payload: Value,
}

impl OutboundEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Socket.IO event packet for the default namespace
    pub fn to_packet(&self) -> EnginePacket {
        EnginePacket::Message(SocketPacket::event(&self.name, self.payload.clone()).encode())
    }

    /// Decode an event packet queued for a connection
    pub fn from_packet(packet: &EnginePacket) -> Option<Self> {
        let EnginePacket::Message(text) = packet else {
            return None;
        };
        match SocketPacket::decode(text).ok()? {
            SocketPacket::Event { name, payload, .. } => Some(Self { name, payload }),
            _ => None,
        }
    }
}
