//! HTTP/2 frame types and payload parsing
//!
//! This module defines the frame types specified in RFC 7540 Section 6 that
//! a streaming client sends or must understand, and the payload parsers that
//! turn a raw [`Frame`] read off the wire into a typed frame.

use super::error::{Error, ErrorCode, Result};
use super::settings::Settings;
use bytes::{Buf, Bytes};
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA (0x0) - request or response body bytes
    Data = 0x0,
    /// HEADERS (0x1) - opens a stream and carries the first header block fragment
    Headers = 0x1,
    /// PRIORITY (0x2) - stream priority advice; read and ignored
    Priority = 0x2,
    /// RST_STREAM (0x3) - terminates one stream
    RstStream = 0x3,
    /// SETTINGS (0x4) - connection parameters, acknowledged by the receiver
    Settings = 0x4,
    /// PUSH_PROMISE (0x5) - server push; disabled by this client
    PushPromise = 0x5,
    /// PING (0x6) - liveness check, echoed back with ACK
    Ping = 0x6,
    /// GOAWAY (0x7) - starts connection shutdown
    Goaway = 0x7,
    /// WINDOW_UPDATE (0x8) - grants flow-control credit
    WindowUpdate = 0x8,
    /// CONTINUATION (0x9) - further header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Wire value of this frame type
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Frame type for a wire value, `None` for extension types
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Name as written in RFC 7540
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// END_STREAM (0x1) on DATA and HEADERS: last frame the sender sends on the stream
    pub const END_STREAM: u8 = 0x1;
    /// ACK (0x1); shares the bit with END_STREAM and only means ACK on
    /// SETTINGS and PING
    pub const ACK: u8 = 0x1;
    /// END_HEADERS (0x4): the header block is complete
    pub const END_HEADERS: u8 = 0x4;
    /// PADDED (0x8): a pad length byte leads the payload
    pub const PADDED: u8 = 0x8;
    /// PRIORITY (0x20): HEADERS carries dependency and weight fields
    pub const PRIORITY: u8 = 0x20;

    /// No flags set
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Flags from the wire byte
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Wire byte for these flags
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set `flag` in addition to those already set
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Whether any bit of `flag` is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// A frame as read off the wire, before its payload is interpreted
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame type; extension types are kept so they can be skipped
    pub raw_type: u8,
    /// Frame flags, interpreted per frame type
    pub flags: FrameFlags,
    /// Stream identifier (0 for connection-level frames)
    pub stream_id: u32,
    /// Payload without the 9-byte frame header
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame of a known type
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: Bytes) -> Self {
        Frame {
            raw_type: frame_type.as_u8(),
            flags,
            stream_id,
            payload,
        }
    }

    /// Known frame type, `None` for extension frames that must be ignored
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.raw_type)
    }
}

/// Remove the Pad Length byte and trailing padding from a PADDED payload
fn strip_padding(flags: FrameFlags, mut payload: Bytes) -> Result<Bytes> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::Protocol("PADDED frame without pad length".to_string()));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::Protocol(format!(
            "Padding {} exceeds payload {}",
            pad_len,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Stream the data belongs to
    pub stream_id: u32,
    /// Body bytes with any padding removed
    pub data: Bytes,
    /// Last DATA frame on the stream
    pub end_stream: bool,
    /// Bytes counted against flow control, padding included
    pub flow_len: usize,
}

impl DataFrame {
    /// Create an unpadded DATA frame
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let flow_len = data.len();
        DataFrame {
            stream_id,
            data,
            end_stream,
            flow_len,
        }
    }

    /// Parse a DATA frame, stripping padding
    ///
    /// Fails on stream 0 or a pad length longer than the payload.
    pub fn decode(frame: Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("DATA frame on stream 0".to_string()));
        }
        let flow_len = frame.payload.len();
        let data = strip_padding(frame.flags, frame.payload)?;
        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            flow_len,
        })
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream the header block belongs to
    pub stream_id: u32,
    /// Header block fragment; more may follow in CONTINUATION frames
    pub header_block: Bytes,
    /// No DATA follows on this stream
    pub end_stream: bool,
    /// The header block is complete in this frame
    pub end_headers: bool,
}

impl HeadersFrame {
    /// Create a HEADERS frame without padding or priority
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
        }
    }

    /// Parse a HEADERS frame, dropping padding and priority fields
    pub fn decode(frame: Frame) -> Result<Self> {
        if frame.stream_id == 0 {
            return Err(Error::Protocol("HEADERS frame on stream 0".to_string()));
        }
        let mut block = strip_padding(frame.flags, frame.payload)?;
        if frame.flags.is_priority() {
            // Stream dependency (4) + weight (1); priorities are not used
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS priority truncated".to_string()));
            }
            block.advance(5);
        }
        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
        })
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    /// Stream whose header block continues
    pub stream_id: u32,
    /// Next header block fragment
    pub header_block: Bytes,
    /// Last fragment of the block
    pub end_headers: bool,
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    /// Stream being reset
    pub stream_id: u32,
    /// Reason for the reset
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    /// Parse a RST_STREAM frame; the payload must be exactly 4 bytes
    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("RST_STREAM must be 4 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_u32(payload.get_u32()),
        })
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    /// Acknowledgement of the peer's SETTINGS; carries no parameters
    pub ack: bool,
    /// Parameters carried by a non-ACK frame
    pub settings: Settings,
}

impl SettingsFrame {
    /// SETTINGS frame announcing `settings`
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Empty SETTINGS frame with the ACK flag
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::new(),
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.stream_id != 0 {
            return Err(Error::Protocol(
                "SETTINGS frame must have stream ID 0".to_string(),
            ));
        }
        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(SettingsFrame::ack());
        }
        Ok(SettingsFrame::new(Settings::decode(&frame.payload)?))
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// Reply to an earlier PING
    pub ack: bool,
    /// Opaque data, echoed unchanged in the reply
    pub data: [u8; 8],
}

impl PingFrame {
    /// PING that expects a reply
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Reply to a PING carrying `data`
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let data = <[u8; 8]>::try_from(&frame.payload[..])
            .map_err(|_| Error::FrameSize("PING must be 8 bytes".to_string()))?;
        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Highest stream the sender processed or may still process
    pub last_stream_id: u32,
    /// Reason for closing the connection
    pub error_code: ErrorCode,
    /// Opaque diagnostic data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a GOAWAY frame
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize("GOAWAY shorter than 8 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
        let error_code = ErrorCode::from_u32(payload.get_u32());
        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: u32,
    /// Credit granted, 1 to 2^31-1 bytes
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a WINDOW_UPDATE frame
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }

    /// Parse a WINDOW_UPDATE frame; a zero increment is left to the caller
    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("WINDOW_UPDATE must be 4 bytes".to_string()));
        }
        let mut payload = frame.payload.clone();
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id,
            size_increment: payload.get_u32() & 0x7FFF_FFFF,
        })
    }
}
