//! Event stream framing
//!
//! Request and response bodies of a streaming transcription carry a
//! sequence of binary event-stream messages. Each message is
//! self-delimiting:
//!
//! ```text
//! +---------------+----------------+--------------+---------+---------+-------------+
//! | total len u32 | headers len u32| prelude crc  | headers | payload | message crc |
//! +---------------+----------------+--------------+---------+---------+-------------+
//! ```
//!
//! All integers are big-endian and both checksums are CRC32. Because the
//! total length leads every message, a [`MessageDecoder`] can recover
//! message boundaries no matter how the body was split into chunks.

pub mod decoder;
pub mod message;

pub use decoder::MessageDecoder;
pub use message::{Header, HeaderValue, Message};

use bytes::Bytes;

/// Bytes before the headers: two lengths and the prelude checksum
pub const PRELUDE_LEN: usize = 12;

/// Smallest valid message: prelude plus trailing checksum
pub const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + 4;

/// Largest message accepted or produced
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Largest encoded header section
pub const MAX_HEADERS_LEN: usize = 128 * 1024;

/// Content type of an event-stream body
pub const CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

pub const MESSAGE_TYPE: &str = ":message-type";
pub const EVENT_TYPE: &str = ":event-type";
pub const EXCEPTION_TYPE: &str = ":exception-type";
pub const ERROR_CODE: &str = ":error-code";
pub const ERROR_MESSAGE: &str = ":error-message";
pub const MESSAGE_CONTENT_TYPE: &str = ":content-type";

/// Event-stream errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Prelude checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    PreludeChecksum { expected: u32, computed: u32 },

    #[error("Message checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    MessageChecksum { expected: u32, computed: u32 },

    #[error("Invalid message length {0}")]
    InvalidLength(usize),

    #[error("Message of {0} bytes exceeds the {} byte limit", MAX_MESSAGE_LEN)]
    MessageTooLong(usize),

    #[error("Headers of {0} bytes exceed the {} byte limit", MAX_HEADERS_LEN)]
    HeadersTooLong(usize),

    #[error("Unknown header value type {0}")]
    InvalidHeaderType(u8),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Stream ended inside a message ({0} bytes buffered)")]
    UnexpectedEof(usize),

    #[error("Decoder stopped after an earlier error")]
    Corrupt,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Frame one chunk of audio as an `AudioEvent`
pub fn audio_event(audio: Bytes) -> Message {
    Message::new(audio)
        .with_header(MESSAGE_TYPE, HeaderValue::String("event".to_string()))
        .with_header(EVENT_TYPE, HeaderValue::String("AudioEvent".to_string()))
        .with_header(
            MESSAGE_CONTENT_TYPE,
            HeaderValue::String("application/octet-stream".to_string()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_event_headers() {
        let message = audio_event(Bytes::from_static(b"\x01\x02"));
        assert_eq!(message.header_str(MESSAGE_TYPE), Some("event"));
        assert_eq!(message.header_str(EVENT_TYPE), Some("AudioEvent"));
        assert_eq!(
            message.header_str(MESSAGE_CONTENT_TYPE),
            Some("application/octet-stream")
        );
        assert_eq!(message.payload(), &Bytes::from_static(b"\x01\x02"));
    }
}
