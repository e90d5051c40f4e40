//! # Telemetry Configuration
//!
//! Every subsystem is toggled independently and every field is optional.
//! The tree deserializes from camelCase JSON, so a host can hand over its
//! plugin configuration block unchanged:
//!
//! ```json
//! {
//!   "filePath": "/var/log/agent/telemetry.jsonl",
//!   "rateLimit": { "enabled": true, "maxEventsPerSecond": 50 },
//!   "rotate": { "enabled": true, "maxSizeBytes": 1048576, "maxFiles": 3 },
//!   "syslog": { "enabled": true, "host": "siem.internal", "protocol": "tcp-tls" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default active log file, relative to the working directory.
pub const DEFAULT_FILE_PATH: &str = "telemetry.jsonl";

/// Default replacement token for redacted values.
pub const DEFAULT_REPLACEMENT: &str = "[REDACTED]";

/// Default digest for the integrity chain.
pub const DEFAULT_ALGORITHM: &str = "sha256";

/// Default admission rate (events per second).
pub const DEFAULT_MAX_EVENTS_PER_SECOND: f64 = 100.0;

/// Top-level telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryConfig {
    /// Master switch; when false nothing is recorded.
    pub enabled: bool,

    /// Active JSONL file. Rotated generations live next to it.
    pub file_path: PathBuf,

    /// Remote collector forwarding.
    pub syslog: Option<SyslogConfig>,

    /// Sensitive value scrubbing.
    pub redact: RedactConfig,

    /// Hash chaining.
    pub integrity: IntegrityConfig,

    /// Admission control.
    pub rate_limit: RateLimitConfig,

    /// Size-based rotation of the active file.
    pub rotate: RotateConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            enabled: true,
            file_path: PathBuf::from(DEFAULT_FILE_PATH),
            syslog: None,
            redact: RedactConfig::default(),
            integrity: IntegrityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            rotate: RotateConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Configuration with every optional subsystem switched on at its
    /// defaults, writing to `file_path`. Syslog stays off since it needs a host.
    pub fn hardened(file_path: impl Into<PathBuf>) -> Self {
        TelemetryConfig {
            enabled: true,
            file_path: file_path.into(),
            syslog: None,
            redact: RedactConfig {
                enabled: true,
                ..Default::default()
            },
            integrity: IntegrityConfig {
                enabled: true,
                ..Default::default()
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                ..Default::default()
            },
            rotate: RotateConfig {
                enabled: true,
                ..Default::default()
            },
        }
    }
}

/// Syslog transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyslogProtocol {
    #[default]
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "tcp-tls")]
    TcpTls,
}

impl SyslogProtocol {
    /// Conventional collector port for the protocol.
    pub fn default_port(self) -> u16 {
        match self {
            SyslogProtocol::Udp | SyslogProtocol::Tcp => 514,
            SyslogProtocol::TcpTls => 6514,
        }
    }
}

/// Line format shipped to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogFormat {
    #[default]
    Cef,
    Json,
}

/// Remote collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyslogConfig {
    pub enabled: bool,

    /// Collector host name or address.
    pub host: String,

    /// Collector port; the protocol's conventional port when unset.
    pub port: Option<u16>,

    pub protocol: SyslogProtocol,

    /// Syslog facility number (0-23). Defaults to 16 (local0).
    pub facility: u8,

    /// APP-NAME field of the syslog header.
    pub app_name: String,

    pub format: SyslogFormat,

    /// Extra PEM bundle trusted for `tcp-tls`, on top of the system roots.
    pub ca_file: Option<PathBuf>,

    /// TLS server name when it differs from `host`.
    pub server_name: Option<String>,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        SyslogConfig {
            enabled: false,
            host: String::new(),
            port: None,
            protocol: SyslogProtocol::Udp,
            facility: 16,
            app_name: "openclaw".to_string(),
            format: SyslogFormat::Cef,
            ca_file: None,
            server_name: None,
        }
    }
}

impl SyslogConfig {
    /// Port actually dialled.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

/// Redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedactConfig {
    pub enabled: bool,

    /// Extra regular expressions, tried after the built-in set.
    pub patterns: Vec<String>,

    pub replacement: String,
}

impl Default for RedactConfig {
    fn default() -> Self {
        RedactConfig {
            enabled: false,
            patterns: Vec::new(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

/// Hash chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrityConfig {
    pub enabled: bool,

    /// `sha256`, `sha384` or `sha512`.
    pub algorithm: String,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        IntegrityConfig {
            enabled: false,
            algorithm: DEFAULT_ALGORITHM.to_string(),
        }
    }
}

/// Token bucket settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Refill rate. 100 when unset.
    pub max_events_per_second: Option<f64>,

    /// Bucket capacity. Twice the rate when unset.
    pub burst_size: Option<f64>,
}

/// Rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RotateConfig {
    pub enabled: bool,

    /// Rotate once the active file reaches this size.
    pub max_size_bytes: u64,

    /// Rotated generations to keep.
    pub max_files: usize,

    /// Gzip rotated generations.
    pub compress: bool,
}

impl Default for RotateConfig {
    fn default() -> Self {
        RotateConfig {
            enabled: false,
            max_size_bytes: 10 * 1024 * 1024, // 10 MB
            max_files: 5,
            compress: true,
        }
    }
}
