//! # Telemetry Module - audit sinks for agent activity
//!
//! Everything that leaves the process:
//! - Local NDJSON audit file with size-based rotation
//! - Remote syslog forwarding (CEF or JSON over UDP/TCP/TLS)
//! - The service that feeds both from the in-memory pipeline

pub mod cef;
pub mod rotate;
pub mod service;
pub mod syslog;
pub mod transport;
pub mod writer;

pub use rotate::{Generation, RotatingWriter, RotationPolicy};
pub use service::{RecordOutcome, TelemetryService, TelemetryStats};
pub use syslog::{SyslogFormatter, SyslogStats, SyslogWriter};
pub use writer::{TelemetryWriter, WriterStats};
