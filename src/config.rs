use room_relay::{AllowedOrigins, SocketOptions, TransportKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_id: default_instance_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL, e.g., "redis://localhost:6379" or "rediss://:password@host:6380".
    /// Unset means the relay only serves its own clients.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: default_channel_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_transports")]
    pub transports: Vec<String>,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            transports: default_transports(),
            ping_timeout_ms: default_ping_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_channel_prefix() -> String {
    "relay".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_transports() -> Vec<String> {
    vec!["websocket".to_string(), "polling".to_string()]
}

fn default_ping_timeout_ms() -> u64 {
    60_000
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        // Environment variables take precedence over the file
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.to_socket_options()?;

        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number, got `{}`", port))?;
        }
        if let Some(id) = lookup("INSTANCE_ID").filter(|id| !id.is_empty()) {
            self.server.instance_id = id;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = Some(url).filter(|url| !url.is_empty());
        }
        if let Some(prefix) = lookup("REDIS_CHANNEL_PREFIX").filter(|p| !p.is_empty()) {
            self.redis.channel_prefix = prefix;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.socket.allowed_origins = split_list(&origins);
        }
        if let Some(transports) = lookup("SOCKET_TRANSPORTS") {
            self.socket.transports = split_list(&transports);
        }
        if let Some(ms) = lookup("PING_TIMEOUT_MS") {
            self.socket.ping_timeout_ms = ms
                .parse()
                .map_err(|_| anyhow::anyhow!("PING_TIMEOUT_MS must be milliseconds, got `{}`", ms))?;
        }
        if let Some(ms) = lookup("PING_INTERVAL_MS") {
            self.socket.ping_interval_ms = ms
                .parse()
                .map_err(|_| anyhow::anyhow!("PING_INTERVAL_MS must be milliseconds, got `{}`", ms))?;
        }
        Ok(())
    }

    /// Validated transport options for the gateway
    pub fn to_socket_options(&self) -> anyhow::Result<SocketOptions> {
        let mut transports = Vec::new();
        for name in &self.socket.transports {
            let transport = TransportKind::parse(name)
                .ok_or_else(|| anyhow::anyhow!("unknown transport `{}`", name))?;
            if !transports.contains(&transport) {
                transports.push(transport);
            }
        }

        let options = SocketOptions {
            allowed_origins: AllowedOrigins::from_list(&self.socket.allowed_origins),
            transports,
            ping_interval: Duration::from_millis(self.socket.ping_interval_ms),
            ping_timeout: Duration::from_millis(self.socket.ping_timeout_ms),
            ..SocketOptions::default()
        };
        options.validate()?;
        Ok(options)
    }
}
