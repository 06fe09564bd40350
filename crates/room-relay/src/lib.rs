//! # Room Relay
//!
//! A room-scoped real-time event relay speaking the Socket.IO protocol.
//!
//! Clients join `project:<id>` and `chat:<id>` rooms and emit task/chat events;
//! every event is forwarded verbatim to the other members of its room, on this
//! instance and, through a [`Backbone`], on every other instance.
//!
//! ## Features
//!
//! - **Socket.IO transports**: WebSocket with HTTP long-polling fallback at `/socket.io/`
//! - **Typed events**: payloads are validated into [`ClientEvent`] at the boundary
//! - **No echo**: a broadcast never reaches its sender
//! - **Pluggable Backbone**: implement `Backbone` to fan out over any pub/sub system
//! - **Local degradation**: without a backbone the relay keeps serving its own clients
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use room_relay::{Gateway, NoopBackbone};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Gateway::builder()
//!         .port(8080)
//!         .backbone(NoopBackbone)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Event vocabulary
//!
//! | Event | Room |
//! |---|---|
//! | `join-project`, `leave-project` | `project:<payload>` |
//! | `join-chat` | `chat:<payload>` |
//! | `task-moved`, `task-updated`, `task-created`, `task-deleted` | `project:<payload.projectId>` |
//! | `chat-message` | `chat:<payload.chatId>` |

pub mod backbone;
mod connection;
mod error;
mod event;
mod manager;
pub mod options;
pub mod protocol;
mod registry;
mod relay;

#[cfg(feature = "server")]
mod gateway;
#[cfg(feature = "server")]
mod handler;

// Re-exports
pub use backbone::{Backbone, Envelope, EnvelopeHandler, MemoryBackbone, NoopBackbone};
pub use connection::{
    Connection, ConnectionId, ConnectionMetadata, SendFailure, TransportKind, OUTBOUND_CAPACITY,
};
pub use error::{Error, Result};
pub use event::{BroadcastKind, ClientEvent, EventError, OutboundEvent, Room, RoomKind};
pub use manager::{ConnectionManager, DisconnectReason, Session};
pub use options::{AllowedOrigins, SocketOptions};
pub use registry::RoomRegistry;
pub use relay::EventRelay;

#[cfg(feature = "server")]
pub use gateway::{run_heartbeat, Gateway, GatewayBuilder};
#[cfg(feature = "server")]
pub use handler::{HandshakeError, SOCKET_PATH};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
