//! # Telemetry Service
//!
//! Thread-safe entry point that runs every submitted event through the
//! pipeline and hands it to the sinks:
//!
//! ```text
//! record(input)
//!   -> seq + ts
//!   -> rate limiter   (Dropped: stop here)
//!   -> redactor
//!   -> integrity chain
//!   -> file writer + syslog forwarder
//! ```
//!
//! Everything up to the enqueue happens under one lock, so the order of
//! records in the file always matches their `seq` order.

use super::syslog::{SyslogStats, SyslogWriter};
use super::writer::{TelemetryWriter, WriterStats};
use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::event::{now_ms, EventInput, TelemetryEvent};
use crate::pipeline::{IntegrityChain, RateLimiter, Redactor};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

/// Log a rate-limit warning every this many drops.
const DROP_WARN_INTERVAL: u64 = 1000;

/// Result of submitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Queued for writing with this sequence number.
    Recorded { seq: u64 },

    /// Rejected by the rate limiter. The sequence number stays consumed.
    Dropped { seq: u64 },

    /// Telemetry is switched off.
    Disabled,
}

/// Telemetry statistics
#[derive(Debug, Clone, Default)]
pub struct TelemetryStats {
    pub recorded: u64,
    pub dropped: u64,
    pub last_seq: u64,
    pub chain_head: Option<String>,
    pub writer: WriterStats,
    pub syslog: SyslogStats,
}

struct PipelineState {
    next_seq: u64,
    recorded: u64,
    limiter: RateLimiter,
    chain: IntegrityChain,
}

struct Sinks {
    writer: TelemetryWriter,
    syslog: SyslogWriter,
}

/// Thread-safe telemetry service
pub struct TelemetryService {
    redactor: Redactor,
    state: Mutex<PipelineState>,
    sinks: Option<Sinks>,
}

impl TelemetryService {
    /// Build every stage from `config` and start the sinks.
    ///
    /// Fails on invalid configuration (bad patterns, unknown digest,
    /// nonsensical rates, missing syslog host). Syslog forwarding must be
    /// started from within a tokio runtime.
    pub fn start(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let limiter = RateLimiter::from_config(&config.rate_limit)?;
        let redactor = Redactor::from_config(&config.redact)?;
        let chain = IntegrityChain::from_config(&config.integrity)?;

        let sinks = if config.enabled {
            let writer = TelemetryWriter::open(&config.file_path, &config.rotate)?;
            let syslog = SyslogWriter::from_config(config.syslog.as_ref())?;
            Some(Sinks { writer, syslog })
        } else {
            info!("Telemetry disabled; events will be ignored");
            None
        };

        if sinks.is_some() {
            info!(
                "Telemetry recording to {} (redact: {}, integrity: {}, rate limit: {}, rotate: {})",
                config.file_path.display(),
                config.redact.enabled,
                config.integrity.enabled,
                config.rate_limit.enabled,
                config.rotate.enabled
            );
        }

        Ok(TelemetryService {
            redactor,
            state: Mutex::new(PipelineState {
                next_seq: 1,
                recorded: 0,
                limiter,
                chain,
            }),
            sinks,
        })
    }

    /// Run one event through the pipeline and queue it.
    ///
    /// Returns once the record is queued; write failures are reported by
    /// [`flush`](Self::flush). Errors here mean the sinks were closed or the
    /// event could not be serialized.
    pub fn record(&self, input: impl Into<EventInput>) -> Result<RecordOutcome, TelemetryError> {
        let Some(sinks) = &self.sinks else {
            return Ok(RecordOutcome::Disabled);
        };

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        if !state.limiter.allow() {
            let dropped = state.limiter.dropped();
            if dropped == 1 || dropped % DROP_WARN_INTERVAL == 0 {
                warn!("Telemetry rate limit exceeded; {} events dropped so far", dropped);
            } else {
                debug!("Dropped telemetry event seq={}", seq);
            }
            return Ok(RecordOutcome::Dropped { seq });
        }

        let event = TelemetryEvent::stamp(input.into(), seq, now_ms());
        let event = self.redactor.redact_event(event);
        let signed = state.chain.sign(event)?;

        sinks.writer.write(&signed)?;
        if let Err(e) = sinks.syslog.write(&signed) {
            error!("Failed to queue syslog message for seq={}: {}", seq, e);
        }

        state.recorded += 1;
        Ok(RecordOutcome::Recorded { seq })
    }

    /// Wait until every event recorded so far has been written and
    /// forwarded. Reports the first sink failure since the previous flush.
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        let Some(sinks) = &self.sinks else {
            return Ok(());
        };
        let file = sinks.writer.flush().await;
        let syslog = sinks.syslog.flush().await;
        file.and(syslog)
    }

    /// Flush and release every sink. The service cannot be used afterwards.
    pub async fn close(self) -> Result<(), TelemetryError> {
        let stats = self.stats();
        let Some(sinks) = self.sinks else {
            return Ok(());
        };

        let file = sinks.writer.close().await;
        let syslog = sinks.syslog.close().await;

        info!(
            "Telemetry closed: {} recorded, {} dropped",
            stats.recorded, stats.dropped
        );
        file.and(syslog)
    }

    /// Get telemetry statistics
    pub fn stats(&self) -> TelemetryStats {
        let state = self.state.lock();
        TelemetryStats {
            recorded: state.recorded,
            dropped: state.limiter.dropped(),
            last_seq: state.next_seq - 1,
            chain_head: state.chain.head().map(str::to_string),
            writer: self
                .sinks
                .as_ref()
                .map(|s| s.writer.stats())
                .unwrap_or_default(),
            syslog: self
                .sinks
                .as_ref()
                .map(|s| s.syslog.stats())
                .unwrap_or_default(),
        }
    }

    /// Check if telemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.sinks.is_some()
    }
}
