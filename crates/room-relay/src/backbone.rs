//! Fan-out backbone trait and in-process implementations
//!
//! A backbone replicates broadcasts between relay instances. Implement
//! [`Backbone`] to plug in any publish/subscribe system; `room-relay-redis`
//! provides the Redis one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionId;
use crate::event::Room;

/// Broadcast replicated over the backbone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Instance that accepted the event from its client
    pub origin: String,
    pub room: Room,
    pub event: String,
    pub payload: Value,
    /// Sending connection, excluded on every instance
    pub sender: ConnectionId,
}

impl Envelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Callback invoked for every envelope received from the backbone
pub type EnvelopeHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Cross-instance publish/subscribe bus
///
/// Implementations are constructed (and connected) before the relay starts
/// and closed after it stops.
///
/// # Example
///
/// ```rust,ignore
/// use room_relay::{Backbone, Envelope, EnvelopeHandler};
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// struct MyBus;
///
/// #[async_trait]
/// impl Backbone for MyBus {
///     async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()> {
///         send_somewhere(envelope.to_json()?).await
///     }
///
///     async fn start(&self, handler: EnvelopeHandler, cancel: CancellationToken) -> anyhow::Result<()> {
///         loop {
///             tokio::select! {
///                 _ = cancel.cancelled() => break,
///                 // msg = receive() => handler(Envelope::from_json(&msg)?),
///             }
///         }
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str { "MyBus" }
/// }
/// ```
#[async_trait]
pub trait Backbone: Send + Sync + 'static {
    /// Publish an envelope to every instance
    async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()>;

    /// Receive envelopes until the cancellation token is triggered.
    ///
    /// Envelopes published by this instance may be delivered back; the relay
    /// filters them by origin.
    async fn start(&self, handler: EnvelopeHandler, cancel: CancellationToken)
        -> anyhow::Result<()>;

    /// Return the backbone name (for logging)
    fn name(&self) -> &'static str;

    /// Release backbone connections on shutdown
    async fn close(&self) {
        // Default: nothing to release
    }
}

/// Local-only relay: nothing is replicated
pub struct NoopBackbone;

#[async_trait]
impl Backbone for NoopBackbone {
    async fn publish(&self, _envelope: &Envelope) -> anyhow::Result<()> {
        Ok(())
    }

    async fn start(
        &self,
        _handler: EnvelopeHandler,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        tracing::info!("NoopBackbone started (relay is local-only)");
        cancel.cancelled().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Noop (local-only)"
    }
}

/// In-process bus shared by several relays in one process
///
/// Clone it and hand one clone to each relay instance.
#[derive(Clone)]
pub struct MemoryBackbone {
    sender: broadcast::Sender<Envelope>,
}

impl MemoryBackbone {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for MemoryBackbone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backbone for MemoryBackbone {
    async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()> {
        // No receivers simply means no other instance is running
        let _ = self.sender.send(envelope.clone());
        Ok(())
    }

    async fn start(
        &self,
        handler: EnvelopeHandler,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut stream = BroadcastStream::new(self.sender.subscribe());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = stream.next() => {
                    match item {
                        Some(Ok(envelope)) => handler(envelope),
                        Some(Err(e)) => tracing::warn!(error = %e, "Memory backbone lagged"),
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
