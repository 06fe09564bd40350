//! Gateway builder and runner

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::backbone::{Backbone, NoopBackbone};
use crate::connection::TransportKind;
use crate::error::Result;
use crate::handler::{self, RelayState, SOCKET_PATH};
use crate::manager::{ConnectionManager, DisconnectReason};
use crate::options::{AllowedOrigins, SocketOptions};
use crate::registry::RoomRegistry;
use crate::relay::EventRelay;

/// Relay server configuration and runner
pub struct Gateway {
    port: u16,
    options: Arc<SocketOptions>,
    connection_manager: ConnectionManager,
    relay: EventRelay,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connection_manager
    }

    /// Build the HTTP router without starting background tasks
    pub fn router(&self) -> Router {
        let state = RelayState {
            connection_manager: self.connection_manager.clone(),
            relay: self.relay.clone(),
            options: self.options.clone(),
        };
        let socket_root = format!("{}/", SOCKET_PATH);

        Router::new()
            .route("/", get(handler::info))
            .route("/info", get(handler::info))
            .route("/health", get(handler::health))
            .route(SOCKET_PATH, get(handler::socket_get).post(handler::socket_post))
            .route(&socket_root, get(handler::socket_get).post(handler::socket_post))
            .layer(cors_layer(&self.options.allowed_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the gateway server until Ctrl+C or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let backbone = self.relay.backbone().clone();

        tracing::info!(
            instance_id = %self.relay.instance_id(),
            backbone = backbone.name(),
            transports = ?self.options.transports,
            ping_interval_ms = self.options.ping_interval.as_millis() as u64,
            ping_timeout_ms = self.options.ping_timeout.as_millis() as u64,
            "Starting relay gateway"
        );

        // Start backbone subscription
        let handler = self.relay.to_handler();
        let backbone_cancel = cancel.clone();
        let subscriber = backbone.clone();
        tokio::spawn(async move {
            if let Err(e) = subscriber.start(handler, backbone_cancel).await {
                tracing::warn!(
                    error = %e,
                    backbone = subscriber.name(),
                    "Backbone subscription failed, relaying locally only"
                );
            }
        });

        // Start heartbeat and liveness task
        let heartbeat_manager = self.connection_manager.clone();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_interval = self.options.ping_interval;
        let liveness_timeout = self.options.liveness_timeout();
        tokio::spawn(async move {
            run_heartbeat(
                heartbeat_manager,
                heartbeat_interval,
                liveness_timeout,
                heartbeat_cancel,
            )
            .await;
        });

        let app = self.router();

        let shutdown_manager = self.connection_manager.clone();
        let cancel_for_shutdown = cancel.clone();
        let graceful = async move {
            shutdown.await;
            cancel_for_shutdown.cancel();
            shutdown_manager.close_all(DisconnectReason::ServerShutdown);
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await?;

        cancel.cancel();
        backbone.close().await;
        tracing::info!("Gateway shutdown complete");
        Ok(())
    }
}

/// Ping every session each interval and reap the ones that stopped answering
pub async fn run_heartbeat(
    manager: ConnectionManager,
    interval: Duration,
    liveness_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let reaped = manager.cleanup_dead_connections(liveness_timeout);
                manager.send_heartbeat();
                tracing::debug!(
                    connections = manager.connection_count(),
                    reaped,
                    "Heartbeat"
                );
            }
        }
    }
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        // Credentials forbid a literal `*`, so echo the caller's origin instead
        AllowedOrigins::Any => AllowOrigin::mirror_request(),
        AllowedOrigins::List(list) => AllowOrigin::list(
            list.iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        ),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    port: u16,
    instance_id: Option<String>,
    backbone: Option<Arc<dyn Backbone>>,
    options: SocketOptions,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            port: 8080,
            instance_id: None,
            backbone: None,
            options: SocketOptions::default(),
        }
    }
}

impl GatewayBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the instance ID
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the fan-out backbone. Without one the relay is local-only.
    pub fn backbone<B: Backbone>(mut self, backbone: B) -> Self {
        self.backbone = Some(Arc::new(backbone));
        self
    }

    /// Set an already shared backbone
    pub fn shared_backbone(mut self, backbone: Arc<dyn Backbone>) -> Self {
        self.backbone = Some(backbone);
        self
    }

    /// Replace all transport options
    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Set allowed cross-origin callers
    pub fn allowed_origins(mut self, origins: AllowedOrigins) -> Self {
        self.options.allowed_origins = origins;
        self
    }

    /// Set accepted transports
    pub fn transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.options.transports = transports;
        self
    }

    /// Set the Engine.IO ping interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.options.ping_interval = interval;
        self
    }

    /// Set the Engine.IO ping timeout
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.options.ping_timeout = timeout;
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway> {
        self.options.validate()?;

        let instance_id = self
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let backbone = self
            .backbone
            .unwrap_or_else(|| Arc::new(NoopBackbone) as Arc<dyn Backbone>);

        let registry = RoomRegistry::new();
        let relay = EventRelay::new(instance_id.clone(), registry.clone(), backbone);

        Ok(Gateway {
            port: self.port,
            options: Arc::new(self.options),
            connection_manager: ConnectionManager::new(instance_id, registry),
            relay,
        })
    }
}
