//! Error types for room-relay

use thiserror::Error;

use crate::event::EventError;
use crate::protocol::ProtocolError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay
#[derive(Error, Debug)]
pub enum Error {
    /// Undecodable Engine.IO / Socket.IO packet
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Event outside the accepted shapes
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Backbone-related errors
    #[error("Backbone error: {0}")]
    Backbone(#[from] anyhow::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
