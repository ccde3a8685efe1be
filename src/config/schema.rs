//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::abr::controller::DEFAULT_THRESHOLD_FACTOR;

/// Root configuration for the ABR proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection slots).
    pub listener: ListenerConfig,

    /// Origin media server.
    pub origin: OriginConfig,

    /// Bitrate adaptation settings.
    pub abr: AbrConfig,

    /// Per-connection buffer limits.
    pub buffers: BufferConfig,

    /// Event loop tuning.
    pub event_loop: EventLoopConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8888").
    pub bind_address: String,

    /// Maximum concurrent client sessions; extra clients get a 503.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            max_connections: 1024,
        }
    }
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Hostname handed to the resolver.
    pub host: String,

    /// Origin TCP port.
    pub port: u16,

    /// Fixed origin address; skips name resolution when set.
    pub www_ip: Option<IpAddr>,

    /// Local address to bind outgoing origin sockets to.
    pub bind_ip: Option<IpAddr>,

    /// How long a session may wait for name resolution.
    pub resolve_timeout_ms: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            host: "video.cs.cmu.edu".to_string(),
            port: 8080,
            www_ip: None,
            bind_ip: None,
            resolve_timeout_ms: 5_000,
        }
    }
}

/// Adaptive bitrate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AbrConfig {
    /// EWMA weight of the newest throughput sample, in (0, 1].
    pub alpha: f64,

    /// A bitrate is sustainable when `threshold_factor × bitrate ≤ throughput`.
    pub threshold_factor: f64,

    /// Bitrate used when neither a catalog nor a global best exists.
    pub floor_bitrate_kbps: u32,

    /// Starting throughput estimate for a new client.
    pub initial_throughput_kbps: f64,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            threshold_factor: DEFAULT_THRESHOLD_FACTOR,
            floor_bitrate_kbps: 10,
            initial_throughput_kbps: 1000.0,
        }
    }
}

/// Buffer limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of each request/response buffer in bytes.
    pub capacity: usize,

    /// Largest manifest body the proxy will absorb.
    pub max_manifest_bytes: usize,

    /// Pending downstream bytes above which origin reads pause.
    pub max_pending_bytes: usize,

    /// Size of a single socket read.
    pub read_chunk: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 8 * 1024,
            max_manifest_bytes: 1024 * 1024,
            max_pending_bytes: 256 * 1024,
            read_chunk: 8 * 1024,
        }
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Upper bound on a single poll wait.
    pub poll_timeout_ms: u64,

    /// Readiness events fetched per poll.
    pub events_capacity: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 5_000,
            events_capacity: 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.buffers.capacity, 8192);
        assert_eq!(config.abr.threshold_factor, 1.5);
        assert_eq!(config.origin.port, 8080);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [origin]
            www_ip = "3.0.0.1"

            [abr]
            alpha = 0.1

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.origin.www_ip, Some("3.0.0.1".parse().unwrap()));
        assert_eq!(config.origin.host, "video.cs.cmu.edu");
        assert_eq!(config.abr.alpha, 0.1);
        assert_eq!(config.abr.floor_bitrate_kbps, 10);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
