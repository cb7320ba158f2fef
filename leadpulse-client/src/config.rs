//! Streaming client configuration
//!
//! Defines all configurable parameters for the progress stream including
//! heartbeat cadence, reconnection policy, transport selection, and the
//! subscription timeout.

use std::time::Duration;

use crate::error::{Result, StreamError};

/// Transport used to carry the progress stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Bidirectional WebSocket (preferred).
    WebSocket,
    /// Server-sent events over a streaming HTTP response.
    Sse,
    /// Plain snapshot polling against the REST API.
    Polling,
}

impl TransportKind {
    /// Next tier in the fallback ladder, if any.
    ///
    /// The ladder runs websocket -> sse -> polling; polling is the floor.
    pub fn downgrade(self) -> Option<TransportKind> {
        match self {
            TransportKind::WebSocket => Some(TransportKind::Sse),
            TransportKind::Sse => Some(TransportKind::Polling),
            TransportKind::Polling => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Sse => "sse",
            TransportKind::Polling => "polling",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TransportKind {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "sse" => Ok(TransportKind::Sse),
            "polling" | "poll" => Ok(TransportKind::Polling),
            other => Err(StreamError::Config(format!(
                "unknown transport '{other}' (expected websocket, sse, or polling)"
            ))),
        }
    }
}

/// Streaming client configuration
///
/// All timeouts and intervals are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, fast vs slow networks).
/// The defaults implement the production contract: 5s heartbeats under a
/// 10s idle-disconnect threshold, three linearly spaced reconnect
/// attempts, and a 5 minute ceiling on any one subscription.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// API base URL (e.g., "https://api.leadpulse.io")
    pub base_url: String,

    /// Transport tier to start on
    pub transport: TransportKind,

    /// Whether to fall down the transport ladder when a tier exhausts
    /// its reconnect attempts
    pub fallback_enabled: bool,

    /// How often to send a keep-alive frame on bidirectional transports.
    /// Must stay under the backend's idle-disconnect threshold (10s).
    pub heartbeat_interval: Duration,

    /// Base delay for reconnect backoff; attempt n waits n * base
    pub reconnect_base_delay: Duration,

    /// Reconnect attempts per transport tier before giving up on it
    pub max_reconnect_attempts: u32,

    /// Hard ceiling on one subscription; when it lapses without a
    /// terminal status the job is force-marked failed
    pub subscription_timeout: Duration,

    /// Timeout for a single connection handshake
    pub connect_timeout: Duration,

    /// Snapshot cadence on the polling tier
    pub poll_interval: Duration,

    /// Inbound silence after which a foreground event treats the
    /// connection as stale and forces a reconnect
    pub stale_after: Duration,
}

impl StreamConfig {
    /// Creates a new configuration with defaults
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport: TransportKind::WebSocket,
            fallback_enabled: true,
            heartbeat_interval: Duration::from_secs(5),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 3,
            subscription_timeout: Duration::from_secs(300), // 5 minutes
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            stale_after: Duration::from_secs(15),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - LEADPULSE_API_URL (required)
    /// - LEADPULSE_TRANSPORT (optional: websocket | sse | polling, default: websocket)
    /// - LEADPULSE_FALLBACK (optional, "true"/"false", default: true)
    /// - LEADPULSE_HEARTBEAT_SECS (optional, default: 5)
    /// - LEADPULSE_RECONNECT_BASE_MS (optional, default: 1000)
    /// - LEADPULSE_MAX_RECONNECT_ATTEMPTS (optional, default: 3)
    /// - LEADPULSE_SUBSCRIPTION_TIMEOUT_SECS (optional, default: 300)
    /// - LEADPULSE_CONNECT_TIMEOUT_SECS (optional, default: 10)
    /// - LEADPULSE_POLL_INTERVAL_SECS (optional, default: 2)
    /// - LEADPULSE_STALE_AFTER_SECS (optional, default: 15)
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("LEADPULSE_API_URL").map_err(|_| {
            StreamError::Config("LEADPULSE_API_URL environment variable not set".to_string())
        })?;

        let mut config = Self::new(base_url);

        if let Ok(raw) = std::env::var("LEADPULSE_TRANSPORT") {
            config.transport = raw.parse()?;
        }

        if let Ok(raw) = std::env::var("LEADPULSE_FALLBACK") {
            config.fallback_enabled = raw.eq_ignore_ascii_case("true") || raw == "1";
        }

        config.heartbeat_interval = env_secs("LEADPULSE_HEARTBEAT_SECS")
            .unwrap_or(config.heartbeat_interval);
        config.reconnect_base_delay = std::env::var("LEADPULSE_RECONNECT_BASE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.reconnect_base_delay);
        config.max_reconnect_attempts = std::env::var("LEADPULSE_MAX_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(config.max_reconnect_attempts);
        config.subscription_timeout = env_secs("LEADPULSE_SUBSCRIPTION_TIMEOUT_SECS")
            .unwrap_or(config.subscription_timeout);
        config.connect_timeout =
            env_secs("LEADPULSE_CONNECT_TIMEOUT_SECS").unwrap_or(config.connect_timeout);
        config.poll_interval =
            env_secs("LEADPULSE_POLL_INTERVAL_SECS").unwrap_or(config.poll_interval);
        config.stale_after =
            env_secs("LEADPULSE_STALE_AFTER_SECS").unwrap_or(config.stale_after);

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(StreamError::Config("base_url cannot be empty".to_string()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(StreamError::Config(
                "base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(StreamError::Config(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }

        // The backend drops connections silent for 10s; a slower heartbeat
        // would hibernate every healthy connection.
        if self.heartbeat_interval >= Duration::from_secs(10) {
            return Err(StreamError::Config(
                "heartbeat_interval must stay under the 10s idle-disconnect threshold".to_string(),
            ));
        }

        if self.reconnect_base_delay.is_zero() {
            return Err(StreamError::Config(
                "reconnect_base_delay must be greater than 0".to_string(),
            ));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(StreamError::Config(
                "max_reconnect_attempts must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(StreamError::Config(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.subscription_timeout <= self.heartbeat_interval {
            return Err(StreamError::Config(
                "subscription_timeout must exceed heartbeat_interval".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080".to_string())
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
