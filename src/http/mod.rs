//! HTTP/2 streaming transport
//!
//! This module carries long-lived bidirectional HTTP/2 streams: the request
//! body is fed by the application while the response body is still arriving.
//!
//! # Architecture
//!
//! The transport uses the session operations abstraction pattern so the same
//! HTTP/2 code runs over plain TCP and TLS:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `FdSessionOps` and `TlsSessionOps` implement it for TCP and OpenSSL
//! - Each [`Connection`] owns one transport thread that drives the session,
//!   decodes frames and pushes results into [`StreamingResponse`]s
//! - [`ConnectionManager`] keeps one negotiated connection per [`Origin`]
//!
//! Application code never touches the transport thread directly. It submits
//! a [`Request`] and awaits the returned [`StreamingResponse`] on any async
//! executor.
//!
//! # Examples
//!
//! ```no_run
//! use transcribe_stream::config::ConnectionConfig;
//! use transcribe_stream::http::{body_channel, ConnectionManager, Origin, Request};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(ConnectionConfig::default());
//! let origin = Origin::parse("https://transcribestreaming.us-east-1.amazonaws.com")?;
//! let connection = manager.get_connection(&origin).await?;
//!
//! let (mut sender, body) = body_channel(8);
//! let response = connection.submit(Request::post("/stream-transcription").body(body))?;
//! sender.send(Bytes::from_static(b"...")).await?;
//! sender.close();
//!
//! println!("status: {}", response.status().await?);
//! loop {
//!     let chunk = response.next_chunk().await?;
//!     if chunk.is_empty() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod h2;
pub mod headers;
pub mod origin;
pub mod pool;
pub mod request;
pub mod response;
pub mod session;
pub mod tls;

pub use body::{body_channel, BodySender, BodyStream};
pub use h2::connection::Connection;
pub use headers::Headers;
pub use origin::{Origin, Scheme};
pub use pool::ConnectionManager;
pub use request::Request;
pub use response::{ResponseSender, ResponseState, StreamingResponse};
pub use session::{FdSessionOps, SessionOps};

use self::h2::error::ErrorCode;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL has no usable host or an unsupported scheme
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// The peer did not agree to speak HTTP/2
    #[error("Protocol negotiation failed: {0}")]
    ProtocolNegotiation(String),

    /// Write to a request body that was already closed
    #[error("Stream closed")]
    StreamClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("HTTP/2 error: {0}")]
    H2(#[from] h2::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Timeout")]
    Timeout,
}

/// Terminal failure of a connection or of one stream on it
///
/// Cloned into every pending and future accessor of the affected
/// [`StreamingResponse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Stream {stream_id} reset by peer: {code}")]
    StreamReset { stream_id: u32, code: ErrorCode },

    #[error("Connection going away: {code}")]
    GoAway { code: ErrorCode },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<h2::Error> for TransportError {
    fn from(err: h2::Error) -> Self {
        match err {
            h2::Error::Io(e) => TransportError::Io(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// ALPN protocol identifier for HTTP/2 over TLS
pub const ALPN_H2: &str = "h2";
