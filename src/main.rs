mod config;

use room_relay::Gateway;
use room_relay_redis::{RedisBackbone, RedisBackboneOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = AppConfig::load()?;
    let options = config.to_socket_options()?;

    tracing::info!(
        instance_id = %config.server.instance_id,
        port = config.server.port,
        redis = config.redis.url.is_some(),
        channel_prefix = %config.redis.channel_prefix,
        "Relay starting"
    );

    let mut builder = Gateway::builder()
        .port(config.server.port)
        .instance_id(config.server.instance_id.clone())
        .options(options);

    // Connect Redis if configured
    if let Some(ref redis_url) = config.redis.url {
        let redis_options = RedisBackboneOptions {
            channel_prefix: config.redis.channel_prefix.clone(),
            ..Default::default()
        };
        match RedisBackbone::connect(redis_url, redis_options).await {
            Ok(backbone) => {
                tracing::info!(channel = %backbone.channel(), "Redis connected - cross-instance fan-out enabled");
                builder = builder.backbone(backbone);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to connect Redis - relaying to local clients only")
            }
        }
    } else {
        tracing::info!("Redis not configured - relaying to local clients only");
    }

    builder.build()?.run().await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay=info,room_relay=info,room_relay_redis=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
