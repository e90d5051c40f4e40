//! Network transports for syslog forwarding: UDP datagrams, plain TCP and
//! TCP wrapped in TLS.

use crate::config::{SyslogConfig, SyslogProtocol};
use crate::error::TelemetryError;
use log::debug;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to reach the collector. Built once; every reconnect reuses it.
pub struct Target {
    host: String,
    port: u16,
    protocol: SyslogProtocol,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Target {
    pub fn from_config(config: &SyslogConfig) -> Result<Self, TelemetryError> {
        if config.host.trim().is_empty() {
            return Err(TelemetryError::Config(
                "syslog host must be set when syslog is enabled".into(),
            ));
        }

        let tls = match config.protocol {
            SyslogProtocol::TcpTls => {
                let connector = create_tls_connector(config.ca_file.as_deref())?;
                let name = config.server_name.as_deref().unwrap_or(&config.host);
                Some((connector, server_name(name)?))
            }
            SyslogProtocol::Udp | SyslogProtocol::Tcp => None,
        };

        Ok(Target {
            host: config.host.clone(),
            port: config.effective_port(),
            protocol: config.protocol,
            tls,
        })
    }

    /// `host:port`, used in logs and errors.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn protocol(&self) -> SyslogProtocol {
        self.protocol
    }

    pub async fn connect(&self) -> io::Result<Connection> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_inner())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }

    async fn connect_inner(&self) -> io::Result<Connection> {
        let remote = self.resolve().await?;

        match (&self.protocol, &self.tls) {
            (SyslogProtocol::Udp, _) => {
                let local: SocketAddr = if remote.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(remote).await?;
                debug!("Syslog UDP socket bound for {}", remote);
                Ok(Connection::Udp(socket))
            }
            (SyslogProtocol::Tcp, _) => {
                let stream = TcpStream::connect(remote).await?;
                stream.set_nodelay(true)?;
                debug!("Syslog TCP connection established to {}", remote);
                Ok(Connection::Tcp(BufWriter::new(stream)))
            }
            (SyslogProtocol::TcpTls, Some((connector, name))) => {
                let stream = TcpStream::connect(remote).await?;
                stream.set_nodelay(true)?;
                let tls = connector.connect(name.clone(), stream).await?;
                debug!("Syslog TLS session established to {}", remote);
                Ok(Connection::Tls(Box::new(BufWriter::new(tls))))
            }
            (SyslogProtocol::TcpTls, None) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "TLS transport without a connector",
            )),
        }
    }

    async fn resolve(&self) -> io::Result<SocketAddr> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", self.host),
                )
            })
    }
}

/// An open channel to the collector.
pub enum Connection {
    Udp(UdpSocket),
    Tcp(BufWriter<TcpStream>),
    Tls(Box<BufWriter<TlsStream<TcpStream>>>),
}

impl Connection {
    /// Send one message. Stream transports frame it with a trailing LF;
    /// UDP sends it as a single datagram.
    pub async fn send(&mut self, line: &str) -> io::Result<()> {
        match self {
            Connection::Udp(socket) => socket.send(line.as_bytes()).await.map(|_| ()),
            Connection::Tcp(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await
            }
            Connection::Tls(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await
            }
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Udp(_) => Ok(()),
            Connection::Tcp(stream) => stream.flush().await,
            Connection::Tls(stream) => stream.flush().await,
        }
    }

    /// Flush and close the write side (sends TLS close_notify).
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Connection::Udp(_) => Ok(()),
            Connection::Tcp(stream) => stream.shutdown().await,
            Connection::Tls(stream) => stream.shutdown().await,
        }
    }
}

/// Client TLS connector trusting the system roots plus an optional PEM bundle.
pub fn create_tls_connector(ca_file: Option<&Path>) -> Result<TlsConnector, TelemetryError> {
    let mut root_store = RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }
    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    if let Some(path) = ca_file {
        let file = File::open(path).map_err(|e| {
            TelemetryError::Config(format!("cannot read CA file {}: {}", path.display(), e))
        })?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                TelemetryError::Config(format!("invalid PEM in {}: {}", path.display(), e))
            })?;
        if certs.is_empty() {
            return Err(TelemetryError::Config(format!(
                "no certificates found in {}",
                path.display()
            )));
        }
        let (added, ignored) = root_store.add_parsable_certificates(certs);
        debug!("Loaded {} certificates from {} ({} ignored)", added, path.display(), ignored);
    }

    if root_store.is_empty() {
        return Err(TelemetryError::Config(
            "no trusted root certificates available for syslog TLS".into(),
        ));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn server_name(name: &str) -> Result<ServerName<'static>, TelemetryError> {
    ServerName::try_from(name.to_string())
        .map_err(|_| TelemetryError::Config(format!("invalid TLS server name: {}", name)))
}
