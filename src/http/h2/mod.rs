//! HTTP/2 protocol implementation
//!
//! This module provides the client side of HTTP/2 (RFC 7540) needed for
//! long-lived bidirectional streams.
//!
//! # Architecture
//!
//! - [`frames`] and [`codec`]: frame types and incremental wire encoding
//! - [`settings`]: SETTINGS parameters and validation
//! - [`flow_control`]: connection and stream windows
//! - [`stream`]: per-stream state machine
//! - [`connection`]: the negotiated connection and its transport thread,
//!   which multiplexes streams, reassembles header blocks with HPACK
//!   (via the `hpack` crate), and answers PING and SETTINGS
//!
//! ## Features
//!
//! - **Frame handling**: DATA, HEADERS, RST_STREAM, SETTINGS, PING, GOAWAY,
//!   WINDOW_UPDATE, CONTINUATION; PRIORITY and extension frames are ignored
//! - **Stream multiplexing**: Multiple concurrent streams per connection,
//!   respecting the peer's SETTINGS_MAX_CONCURRENT_STREAMS
//! - **Flow control**: Connection and stream-level window management in
//!   both directions
//! - **Negotiation**: ALPN `h2` over TLS, prior knowledge over TCP
//!
//! Server push is disabled in the connection preface.

pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod settings;
pub mod stream;

pub use codec::FrameCodec;
pub use connection::Connection;
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
