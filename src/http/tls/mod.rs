//! TLS support for HTTP connections
//!
//! This module implements client-side TLS for `https` origins.
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ALPN, peer verification)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The HTTP/2 driver remains unchanged and transparently uses TLS operations
//!
//! HTTP/2 over TLS is selected with ALPN: the client offers `h2` and the
//! connection is only used if the server picks it.
//!
//! # Examples
//!
//! ```no_run
//! use transcribe_stream::http::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .min_version(TlsVersion::Tls12)
//!     .alpn(&["h2"])
//!     .build()
//!     .unwrap();
//!
//! let tcp_stream = TcpStream::connect("example.com:443").unwrap();
//! let tls_session = tls_config.connect(tcp_stream, "example.com").unwrap();
//! assert_eq!(tls_session.alpn_protocol(), Some(&b"h2"[..]));
//! ```

pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
