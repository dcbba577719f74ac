//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_HOST, PARLEY_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use parley_core::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Room behaviour.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Presence retention.
    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum chat message or stream content length in bytes.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Per-connection outbound queue capacity, in events.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Room configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Remove rooms when their last member leaves.
    #[serde(default)]
    pub evict_empty_rooms: bool,

    /// Broadcast `UserJoined` again when a member rejoins.
    #[serde(default)]
    pub renotify_on_rejoin: bool,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Interval between offline-record sweeps in milliseconds. 0 disables the sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// How long an offline record is kept in milliseconds.
    #[serde(default = "default_offline_retention")]
    pub offline_retention_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds, announced to clients.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_max_content_length() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue_capacity() -> usize {
    parley_core::hub::DEFAULT_QUEUE_CAPACITY
}

fn default_sweep_interval() -> u64 {
    60_000 // 1 minute
}

fn default_offline_retention() -> u64 {
    3_600_000 // 1 hour
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            presence: PresenceConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            max_content_length: default_max_content_length(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            offline_retention_ms: default_offline_retention(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PresenceConfig {
    /// Sweep interval, or `None` when sweeping is disabled.
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    #[must_use]
    pub fn offline_retention(&self) -> Duration {
        Duration::from_millis(self.offline_retention_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Coordinator settings derived from this configuration.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            renotify_on_rejoin: self.rooms.renotify_on_rejoin,
            max_content_length: self.limits.max_content_length,
        }
    }
}
