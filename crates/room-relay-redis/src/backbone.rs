//! Redis Pub/Sub fan-out backbone

use async_trait::async_trait;
use redis::aio::{ConnectionManager, PubSub};
use room_relay::{Backbone, Envelope, EnvelopeHandler};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_CHANNEL_PREFIX: &str = "relay";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

/// Options for [`RedisBackbone::connect`]
#[derive(Debug, Clone)]
pub struct RedisBackboneOptions {
    /// Channel prefix shared by every instance
    pub channel_prefix: String,
    /// Upper bound on the startup connection attempt
    pub connect_timeout: Duration,
}

impl Default for RedisBackboneOptions {
    fn default() -> Self {
        Self {
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Redis Pub/Sub backbone
///
/// Holds two connections: a publishing [`ConnectionManager`] (reconnects on
/// its own) and a dedicated subscribing connection, since a connection in
/// subscribe mode cannot issue other commands.
///
/// # Message Format
///
/// Envelopes are published as JSON on `{prefix}#broadcast`:
///
/// ```json
/// {
///     "origin": "instance-1",
///     "room": "project:abc123",
///     "event": "task-moved",
///     "payload": {"projectId": "abc123", "taskId": "t1"},
///     "sender": "8c0f..."
/// }
/// ```
///
/// # Example
///
/// ```rust,ignore
/// use room_relay::Gateway;
/// use room_relay_redis::{RedisBackbone, RedisBackboneOptions};
///
/// let backbone = RedisBackbone::connect("redis://localhost:6379", RedisBackboneOptions::default()).await?;
///
/// Gateway::builder()
///     .backbone(backbone)
///     .build()?
///     .run()
///     .await
/// ```
pub struct RedisBackbone {
    channel: String,
    publisher: RwLock<Option<ConnectionManager>>,
    subscriber: Mutex<Option<PubSub>>,
}

impl RedisBackbone {
    /// Open the publishing and subscribing connections
    pub async fn connect(redis_url: &str, options: RedisBackboneOptions) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let channel = Self::channel_name(&options.channel_prefix);

        let connect = async {
            let publisher = ConnectionManager::new(client.clone()).await?;
            let mut subscriber = client.get_async_pubsub().await?;
            subscriber.subscribe(&channel).await?;
            Ok::<_, redis::RedisError>((publisher, subscriber))
        };

        let (publisher, subscriber) = tokio::time::timeout(options.connect_timeout, connect)
            .await
            .map_err(|_| anyhow::anyhow!("timed out connecting to Redis after {:?}", options.connect_timeout))??;

        info!(channel = %channel, "Redis backbone connected");

        Ok(Self {
            channel,
            publisher: RwLock::new(Some(publisher)),
            subscriber: Mutex::new(Some(subscriber)),
        })
    }

    /// Channel every instance publishes to and subscribes on
    pub fn channel_name(prefix: &str) -> String {
        format!("{}#broadcast", prefix)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Backbone for RedisBackbone {
    async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let payload = envelope.to_json()?;

        let mut conn = {
            let publisher = self.publisher.read().await;
            match &*publisher {
                Some(conn) => conn.clone(),
                None => anyhow::bail!("Redis backbone is closed"),
            }
        };

        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(&self.channel).arg(&payload);
        let fut = cmd.query_async::<i64>(&mut conn);
        let receivers = tokio::time::timeout(PUBLISH_TIMEOUT, fut)
            .await
            .map_err(|_| anyhow::anyhow!("PUBLISH timed out"))??;

        debug!(room = %envelope.room, event = %envelope.event, receivers, "Envelope published");
        Ok(())
    }

    async fn start(&self, handler: EnvelopeHandler, cancel: CancellationToken) -> anyhow::Result<()> {
        let pubsub = self
            .subscriber
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("RedisBackbone can only be started once"))?;

        info!(channel = %self.channel, "Redis backbone subscription started");
        let mut stream = Box::pin(pubsub.into_on_message());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload = match msg.get_payload::<String>() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(error = %e, "Non-text backbone message, skipping");
                                    continue;
                                }
                            };
                            match Envelope::from_json(&payload) {
                                Ok(envelope) => handler(envelope),
                                Err(e) => warn!(error = %e, "Malformed backbone envelope, skipping"),
                            }
                        }
                        None => {
                            warn!("Redis subscription ended, relaying locally only");
                            break;
                        }
                    }
                }
            }
        }

        info!("Redis backbone subscription stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis Pub/Sub"
    }

    async fn close(&self) {
        self.publisher.write().await.take();
        self.subscriber.lock().await.take();
        info!("Redis backbone closed");
    }
}
