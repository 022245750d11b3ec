//! Transport layer for educ
//!
//! A [`Transport`] opens one [`Connection`] per request/response round trip.
//! Call sites only see the traits; whether bytes travel in plaintext or inside
//! a TLS session is decided once, when the transport is built from the
//! configured port.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::{MESSAGE_TERMINATOR, RECEIVE_TIMEOUT_SECS};

/// How long a receive waits for readable data
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(RECEIVE_TIMEOUT_SECS);

//==============================================================================
// Types
//==============================================================================

/// Whether a connection is plaintext or TLS protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Plain,
    Tls,
}

/// Errors raised by connect, send and receive
///
/// All of them are recoverable at the attempt level: the current request is
/// abandoned and retried on the next cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to resolve {host}: no addresses")]
    NoAddresses { host: String },

    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("hostname verification failed: certificate does not match {host}")]
    HostnameMismatch { host: String },

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("message too large ({0} bytes)")]
    MessageTooLarge(usize),

    #[error("no data to receive (timed out after {} seconds)", .0.as_secs())]
    TimedOut(Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

//==============================================================================
// Traits
//==============================================================================

/// One open channel to a peer
///
/// Operations are strictly sequential. Dropping a connection closes its
/// socket; [`Connection::disconnect`] additionally shuts it down gracefully.
#[async_trait]
pub trait Connection: Send {
    /// Returns whether this channel is TLS protected
    fn mode(&self) -> TransportMode;

    /// Sends `request_line` and `headers` joined by CRLF, ending with a blank line
    async fn send(&mut self, request_line: &str, headers: &[String]) -> Result<(), TransportError>;

    /// Reads at most `max_len` bytes, waiting up to [`RECEIVE_TIMEOUT`] for data
    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Shuts the channel down and closes the socket
    async fn disconnect(self: Box<Self>);
}

/// Factory of connections of one [`TransportMode`]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the mode of every connection this transport opens
    fn mode(&self) -> TransportMode;

    /// Resolves `host` with the system resolver
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
        resolve(host, port).await
    }

    /// Connects to the first reachable address of `addrs`
    ///
    /// `host` names the peer for logging and, under TLS, for certificate
    /// verification.
    async fn connect_addrs(
        &self,
        host: &str,
        addrs: &[SocketAddr],
    ) -> Result<Box<dyn Connection>, TransportError>;

    /// Resolves `host` and connects to it
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, TransportError> {
        debug!("connecting to {} ({})...", host, port);
        let addrs = self.resolve(host, port).await?;
        self.connect_addrs(host, &addrs).await
    }
}

//==============================================================================
// Helpers
//==============================================================================

/// Resolves `host:port` into every candidate socket address
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::NoAddresses {
            host: host.to_string(),
        });
    }
    debug!("resolved {} to {} address(es)", host, addrs.len());
    Ok(addrs)
}

/// Tries every address in order until one TCP connect succeeds
pub async fn connect_tcp(host: &str, addrs: &[SocketAddr]) -> Result<TcpStream, TransportError> {
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                debug!("connected to {} ({})", host, addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(TransportError::Connect {
        host: host.to_string(),
        source: last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses")),
    })
}

/// Builds the bytes of a request: lines joined by CRLF plus a blank line
///
/// # Errors
///
/// Returns [`TransportError::MessageTooLarge`] when the message cannot be
/// described by a 32-bit signed length.
pub fn compose_message(request_line: &str, headers: &[String]) -> Result<Vec<u8>, TransportError> {
    let mut message = String::from(request_line);
    for header in headers {
        message.push_str("\r\n");
        message.push_str(header);
    }
    message.push_str(MESSAGE_TERMINATOR);

    if i32::try_from(message.len()).is_err() {
        return Err(TransportError::MessageTooLarge(message.len()));
    }
    Ok(message.into_bytes())
}

/// Receives a response of at most `max_len` bytes
///
/// After the first read, one more read is attempted to pick up a body that
/// arrived in a second segment. That second read never fails the call.
pub async fn receive_response(
    conn: &mut dyn Connection,
    max_len: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut body = conn.receive(max_len).await?;

    let remaining = max_len.saturating_sub(body.len());
    if remaining > 0 {
        match conn.receive(remaining).await {
            Ok(more) => body.extend_from_slice(&more),
            Err(e) => debug!("extra read: {}", e),
        }
    }

    debug!("received {} bytes", body.len());
    Ok(body)
}

//==============================================================================
// Stream Connection
//==============================================================================

/// A [`Connection`] over any byte stream: a TCP socket or a TLS session on one
pub struct StreamConnection<S> {
    stream: S,
    mode: TransportMode,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, mode: TransportMode) -> Self {
        Self { stream, mode }
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn mode(&self) -> TransportMode {
        self.mode
    }

    async fn send(&mut self, request_line: &str, headers: &[String]) -> Result<(), TransportError> {
        let message = compose_message(request_line, headers)?;
        self.stream.write_all(&message).await?;
        self.stream.flush().await?;
        debug!("sent {} bytes", message.len());
        Ok(())
    }

    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];

        let n = match timeout(RECEIVE_TIMEOUT, self.stream.read(&mut buf)).await {
            Err(_) => return Err(TransportError::TimedOut(RECEIVE_TIMEOUT)),
            Ok(Ok(n)) => n,
            // Peers commonly close TLS without close_notify once the response is sent
            Ok(Err(e)) if self.mode == TransportMode::Tls && e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("TLS peer closed without close_notify");
                0
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        if n == 0 && self.mode == TransportMode::Plain {
            return Err(TransportError::ConnectionLost);
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn disconnect(mut self: Box<Self>) {
        match timeout(RECEIVE_TIMEOUT, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("shutdown: {}", e),
            Err(_) => warn!("shutdown: not finished, closing anyway"),
        }
    }
}

//==============================================================================
// Plain Transport
//==============================================================================

/// Plaintext TCP connections
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTransport;

#[async_trait]
impl Transport for PlainTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Plain
    }

    async fn connect_addrs(
        &self,
        host: &str,
        addrs: &[SocketAddr],
    ) -> Result<Box<dyn Connection>, TransportError> {
        let stream = connect_tcp(host, addrs).await?;
        Ok(Box::new(StreamConnection::new(stream, TransportMode::Plain)))
    }
}

//==============================================================================
// Tests
//==============================================================================
