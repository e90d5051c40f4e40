//! # Agent Telemetry
//!
//! Tamper-evident audit sink for agent lifecycle events. Every event an
//! agent host reports (tool calls, messages, LLM usage, agent runs) is
//! stamped, admitted by a token bucket, scrubbed of secrets, linked into a
//! SHA-2 hash chain and appended to a rotating NDJSON file, optionally
//! mirrored to a syslog collector as CEF or JSON.
//!
//! ```no_run
//! use telemetry::{EventKind, TelemetryConfig, TelemetryService};
//!
//! # async fn run() -> Result<(), telemetry::TelemetryError> {
//! let service = TelemetryService::start(TelemetryConfig::hardened("audit/telemetry.jsonl"))?;
//! service.record(EventKind::AgentStart { prompt_length: 42 })?;
//! service.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod telemetry;
pub mod verify;

pub use config::{
    IntegrityConfig, RateLimitConfig, RedactConfig, RotateConfig, SyslogConfig, SyslogFormat,
    SyslogProtocol, TelemetryConfig,
};
pub use error::TelemetryError;
pub use event::{ChainLink, EventInput, EventKind, SignedEvent, TelemetryEvent};
pub use pipeline::{HashAlgorithm, IntegrityChain, RateLimiter, Redactor};
pub use telemetry::{RecordOutcome, TelemetryService, TelemetryStats};
pub use verify::{ChainVerifier, VerifyReport};
