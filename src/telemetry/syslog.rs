//! # Syslog Forwarder
//!
//! Ships each recorded event to a remote collector as an RFC 5424 message
//! whose body is either a CEF line or the JSON record:
//!
//! ```text
//! <134>1 2024-01-01T00:00:00.000Z host openclaw 4242 tool.start - CEF:0|OpenClaw|...
//! ```
//!
//! Sending happens on a tokio task so `write` never waits on the network.
//! UDP is fire-and-forget. TCP and TLS connect on first use, and after any
//! failure the connection is dropped and re-established by the next send;
//! such failures surface from the next `flush()` or `close()`.

use super::cef;
use super::transport::{Connection, Target};
use crate::config::{SyslogConfig, SyslogFormat, SyslogProtocol};
use crate::error::TelemetryError;
use crate::event::SignedEvent;
use chrono::{SecondsFormat, TimeZone, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const MAX_FACILITY: u8 = 23;

/// Map a CEF severity (0-10) onto a syslog severity (0-7).
pub fn syslog_severity(cef_severity: u8) -> u8 {
    match cef_severity {
        0..=3 => 6,
        4..=6 => 5,
        7..=8 => 3,
        _ => 2,
    }
}

/// Renders events into complete syslog messages.
#[derive(Debug, Clone)]
pub struct SyslogFormatter {
    facility: u8,
    hostname: String,
    app_name: String,
    proc_id: String,
    format: SyslogFormat,
}

impl SyslogFormatter {
    pub fn new(config: &SyslogConfig) -> Result<Self, TelemetryError> {
        if config.facility > MAX_FACILITY {
            return Err(TelemetryError::Config(format!(
                "syslog facility must be 0-{}, got {}",
                MAX_FACILITY, config.facility
            )));
        }

        Ok(SyslogFormatter {
            facility: config.facility,
            hostname: header_field(&local_hostname()),
            app_name: header_field(&config.app_name),
            proc_id: std::process::id().to_string(),
            format: config.format,
        })
    }

    /// One complete syslog message for `signed`, without a trailing newline.
    pub fn format(&self, signed: &SignedEvent) -> Result<String, TelemetryError> {
        let event = &signed.event;
        let pri = self.facility as u16 * 8
            + syslog_severity(cef::severity(&event.kind)) as u16;

        let timestamp = i64::try_from(event.ts)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "-".to_string());

        let body = match self.format {
            SyslogFormat::Cef => cef::format_cef(signed),
            SyslogFormat::Json => serde_json::to_string(signed)?,
        };

        Ok(format!(
            "<{}>1 {} {} {} {} {} - {}",
            pri,
            timestamp,
            self.hostname,
            self.app_name,
            self.proc_id,
            event.type_name(),
            body
        ))
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "-".to_string())
}

/// Header fields are printable ASCII without spaces; NILVALUE when empty.
fn header_field(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(48)
        .collect();
    if cleaned.is_empty() {
        "-".to_string()
    } else {
        cleaned
    }
}

/// Counters maintained by the forwarding task.
#[derive(Debug, Clone, Default)]
pub struct SyslogStats {
    pub messages_sent: u64,
    pub send_errors: u64,
    pub connects: u64,
}

type Reply = oneshot::Sender<Result<(), TelemetryError>>;

enum SyslogCommand {
    Send(String),
    Flush(Reply),
    Close(Reply),
}

/// Forwarding strategy, chosen once at construction.
pub enum SyslogWriter {
    /// Forwarding off; every call is a no-op.
    Disabled,

    /// Messages are queued to a tokio task.
    Active(SyslogHandle),
}

pub struct SyslogHandle {
    formatter: SyslogFormatter,
    addr: String,
    tx: mpsc::UnboundedSender<SyslogCommand>,
    closed: AtomicBool,
    stats: Arc<Mutex<SyslogStats>>,
}

impl SyslogWriter {
    /// Build from optional configuration. An enabled writer spawns its task
    /// on the current tokio runtime.
    pub fn from_config(config: Option<&SyslogConfig>) -> Result<Self, TelemetryError> {
        let Some(config) = config.filter(|c| c.enabled) else {
            return Ok(SyslogWriter::Disabled);
        };

        let formatter = SyslogFormatter::new(config)?;
        let target = Target::from_config(config)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            TelemetryError::Config("syslog forwarding requires a tokio runtime".into())
        })?;

        let addr = target.addr();
        let stats = Arc::new(Mutex::new(SyslogStats::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = Forwarder {
            target,
            connection: None,
            pending_error: None,
            stats: Arc::clone(&stats),
        };
        runtime.spawn(forwarder.run(rx));

        info!(
            "Syslog forwarding enabled to {} over {:?} ({:?})",
            addr, config.protocol, config.format
        );

        Ok(SyslogWriter::Active(SyslogHandle {
            formatter,
            addr,
            tx,
            closed: AtomicBool::new(false),
            stats,
        }))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SyslogWriter::Active(_))
    }

    /// Format and queue one event.
    pub fn write(&self, event: &SignedEvent) -> Result<(), TelemetryError> {
        let SyslogWriter::Active(handle) = self else {
            return Ok(());
        };
        if handle.closed.load(Ordering::Acquire) {
            return Err(TelemetryError::Closed);
        }
        let message = handle.formatter.format(event)?;
        handle
            .tx
            .send(SyslogCommand::Send(message))
            .map_err(|_| TelemetryError::Closed)
    }

    /// Wait for every queued message to be handed to the transport.
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        match self {
            SyslogWriter::Disabled => Ok(()),
            SyslogWriter::Active(handle) => {
                if handle.closed.load(Ordering::Acquire) {
                    return Err(TelemetryError::Closed);
                }
                handle.request(SyslogCommand::Flush).await
            }
        }
    }

    /// Flush, shut the connection down and stop the task.
    pub async fn close(&self) -> Result<(), TelemetryError> {
        match self {
            SyslogWriter::Disabled => Ok(()),
            SyslogWriter::Active(handle) => {
                if handle.closed.swap(true, Ordering::AcqRel) {
                    return Err(TelemetryError::Closed);
                }
                debug!("Closing syslog forwarder for {}", handle.addr);
                handle.request(SyslogCommand::Close).await
            }
        }
    }

    pub fn stats(&self) -> SyslogStats {
        match self {
            SyslogWriter::Disabled => SyslogStats::default(),
            SyslogWriter::Active(handle) => handle.stats.lock().clone(),
        }
    }
}

impl SyslogHandle {
    async fn request(&self, command: fn(Reply) -> SyslogCommand) -> Result<(), TelemetryError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| TelemetryError::Closed)?;
        done.await.map_err(|_| TelemetryError::Closed)?
    }
}

struct Forwarder {
    target: Target,
    connection: Option<Connection>,
    pending_error: Option<TelemetryError>,
    stats: Arc<Mutex<SyslogStats>>,
}

impl Forwarder {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyslogCommand>) {
        while let Some(command) = rx.recv().await {
            let mut next = Some(command);
            while let Some(command) = next.take() {
                match command {
                    SyslogCommand::Send(message) => self.send(&message).await,
                    SyslogCommand::Flush(reply) => {
                        let _ = reply.send(self.barrier().await);
                    }
                    SyslogCommand::Close(reply) => {
                        let mut result = self.barrier().await;
                        if let Some(mut connection) = self.connection.take() {
                            if let Err(source) = connection.shutdown().await {
                                if result.is_ok() {
                                    result = Err(TelemetryError::TransportSend {
                                        addr: self.target.addr(),
                                        source,
                                    });
                                }
                            }
                        }
                        let _ = reply.send(result);
                        return;
                    }
                }
                next = rx.try_recv().ok();
            }

            // Queue drained: push buffered stream data out
            self.flush_connection().await;
        }

        if let Some(mut connection) = self.connection.take() {
            connection.shutdown().await.ok();
        }
    }

    async fn send(&mut self, message: &str) {
        if self.connection.is_none() {
            match self.target.connect().await {
                Ok(connection) => {
                    self.stats.lock().connects += 1;
                    self.connection = Some(connection);
                }
                Err(source) => {
                    let e = TelemetryError::TransportConnect {
                        addr: self.target.addr(),
                        source,
                    };
                    self.fail(e);
                    return;
                }
            }
        }

        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.send(message).await {
            Ok(()) => self.stats.lock().messages_sent += 1,
            Err(source) => {
                self.connection = None;
                let e = TelemetryError::TransportSend {
                    addr: self.target.addr(),
                    source,
                };
                self.fail(e);
            }
        }
    }

    async fn flush_connection(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(source) = connection.flush().await {
            self.connection = None;
            let e = TelemetryError::TransportSend {
                addr: self.target.addr(),
                source,
            };
            self.fail(e);
        }
    }

    async fn barrier(&mut self) -> Result<(), TelemetryError> {
        self.flush_connection().await;
        match self.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// UDP failures are logged only; stream failures are also kept for
    /// the next barrier.
    fn fail(&mut self, e: TelemetryError) {
        self.stats.lock().send_errors += 1;
        if self.target.protocol() == SyslogProtocol::Udp {
            warn!("Syslog datagram dropped: {}", e);
            return;
        }
        error!("Syslog forwarding failed: {}", e);
        if self.pending_error.is_none() {
            self.pending_error = Some(e);
        }
    }
}
