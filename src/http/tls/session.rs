//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.
//!
//! The socket is non-blocking once the handshake is done. A socket that
//! polls readable may hold only part of a TLS record, and a blocking read
//! would then stall the connection driver until the rest arrives.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use log::debug;
use openssl::ssl::SslStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    alpn: Option<Vec<u8>>,
    version: &'static str,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    pub fn connect(
        tcp_stream: TcpStream,
        config: &TlsConfig,
        servername: &str,
    ) -> std::result::Result<Self, TlsError> {
        let mut connect = config.connector.configure()?;
        if !config.verify_peer {
            connect.set_verify_hostname(false);
        }

        // Keep in blocking mode for handshake
        let ssl_stream = connect
            .connect(servername, tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("{}: {}", servername, e)))?;

        ssl_stream.get_ref().set_nonblocking(true)?;

        let alpn = ssl_stream.ssl().selected_alpn_protocol().map(|p| p.to_vec());
        let version = ssl_stream.ssl().version_str();
        debug!(
            "TLS handshake with {} complete: {}, ALPN {}",
            servername,
            version,
            alpn.as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_else(|| "<none>".into())
        );

        Ok(TlsSessionOps {
            stream: ssl_stream,
            alpn,
            version,
            failed: false,
        })
    }

    /// Protocol selected by the server via ALPN, if any
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.alpn.as_deref()
    }

    /// Negotiated TLS version, e.g. "TLSv1.3"
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn io_error(&mut self, e: io::Error) -> Error {
        // WANT_READ/WANT_WRITE surface as WouldBlock and are not failures
        if !matches!(
            e.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ) {
            self.failed = true;
        }
        Error::Io(e)
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Records already decrypted by OpenSSL do not show up on the socket
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.has_buffered() {
            return Ok(true);
        }
        poll_fd(self.raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        self.stream.read(buf).map_err(|e| self.io_error(e))
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| self.io_error(e))
    }

    fn close(&mut self) -> HttpResult<()> {
        // Perform SSL shutdown if not failed
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        self.stream
            .get_mut()
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }

    fn has_buffered(&self) -> bool {
        self.stream.ssl().pending() > 0
    }
}
