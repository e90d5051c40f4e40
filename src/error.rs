//! Error types for the telemetry pipeline.
//!
//! Admission rejection by the rate limiter is deliberately absent: a dropped
//! event is a normal outcome reported through [`crate::RecordOutcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building or running the telemetry pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A redaction pattern failed to compile.
    #[error("invalid redaction pattern '{pattern}': {source}")]
    RedactionConfig {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Any other invalid configuration value.
    #[error("invalid telemetry configuration: {0}")]
    Config(String),

    /// Appending to the active log file failed.
    #[error("failed to write telemetry log {path}: {source}")]
    WriteIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rolling the active log file over failed.
    #[error("failed to rotate telemetry log {path}: {source}")]
    Rotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the remote collector failed.
    #[error("failed to connect to syslog collector {addr}: {source}")]
    TransportConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending a line to the remote collector failed.
    #[error("failed to send to syslog collector {addr}: {source}")]
    TransportSend {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An event could not be serialized.
    #[error("failed to serialize telemetry event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The component was already closed.
    #[error("telemetry sink is closed")]
    Closed,
}
