//! Transport options accepted at startup

use std::time::Duration;

use crate::connection::TransportKind;
use crate::error::{Error, Result};

/// Default Engine.IO ping interval
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
/// Default Engine.IO ping timeout
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);
/// Largest polling body accepted, advertised in the handshake
pub const DEFAULT_MAX_PAYLOAD: u64 = 1_000_000;

/// Cross-origin callers allowed to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin (wildcard)
    Any,
    /// Exact origins such as `https://app.example.com`
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Build from a list; a `*` entry means any origin
    pub fn from_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Vec::new();
        for origin in origins {
            let origin = origin.as_ref().trim().trim_end_matches('/');
            if origin == "*" {
                return AllowedOrigins::Any;
            }
            if !origin.is_empty() {
                list.push(origin.to_string());
            }
        }
        AllowedOrigins::List(list)
    }

    /// Parse a comma separated list
    pub fn parse(value: &str) -> Self {
        Self::from_list(value.split(','))
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(list) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|o| o == origin)
            }
        }
    }
}

impl Default for AllowedOrigins {
    fn default() -> Self {
        AllowedOrigins::Any
    }
}

/// Gateway transport configuration
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub allowed_origins: AllowedOrigins,
    /// Accepted transports, in order of preference
    pub transports: Vec<TransportKind>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_payload: u64,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl SocketOptions {
    pub fn allows_transport(&self, transport: TransportKind) -> bool {
        self.transports.contains(&transport)
    }

    /// Time without any inbound packet after which a connection is dead
    pub fn liveness_timeout(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }

    pub fn validate(&self) -> Result<()> {
        if self.transports.is_empty() {
            return Err(Error::Config("at least one transport must be enabled".into()));
        }
        if self.ping_interval.is_zero() || self.ping_timeout.is_zero() {
            return Err(Error::Config("ping interval and timeout must be non-zero".into()));
        }
        if matches!(&self.allowed_origins, AllowedOrigins::List(list) if list.is_empty()) {
            return Err(Error::Config("allowed origin list is empty".into()));
        }
        Ok(())
    }
}
