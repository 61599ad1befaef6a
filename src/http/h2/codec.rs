//! HTTP/2 frame encoding and decoding
//!
//! Encoders produce complete wire frames as [`Bytes`]. The decoder side is
//! incremental: bytes read from the session are appended with
//! [`FrameCodec::feed`] and whole frames are pulled out with
//! [`FrameCodec::next_frame`], so a frame split across several reads is
//! reassembled and several frames in one read are all returned.

use super::error::{Error, Result};
use super::frames::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload the 24-bit length field can describe
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec {
    read_buffer: BytesMut,
    /// Largest payload we advertised in SETTINGS_MAX_FRAME_SIZE
    max_recv_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_recv_frame_size: u32) -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(16 * 1024),
            max_recv_frame_size: max_recv_frame_size as usize,
        }
    }

    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Split a frame header into (raw type, flags, stream id, payload length)
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        let length =
            ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id =
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFF_FFFF;
        (bytes[3], FrameFlags::from_u8(bytes[4]), stream_id, length)
    }

    fn frame(frame_type: FrameType, flags: FrameFlags, stream_id: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&Self::encode_header(frame_type, flags, stream_id, payload.len()));
        buf.put_slice(payload);
        buf.freeze()
    }

    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        Self::frame(FrameType::Data, flags, frame.stream_id, &frame.data)
    }

    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        Self::frame(FrameType::Headers, flags, frame.stream_id, &frame.header_block)
    }

    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        Self::frame(FrameType::Continuation, flags, frame.stream_id, &frame.header_block)
    }

    /// Encode a complete header block, spilling into CONTINUATION frames when
    /// it exceeds the peer's maximum frame size
    pub fn encode_header_block(
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        max_frame_size: usize,
    ) -> BytesMut {
        let mut out = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE);
        let mut rest = block;
        let first = rest.split_to(rest.len().min(max_frame_size));
        out.put(Self::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            first,
            end_stream,
            rest.is_empty(),
        )));
        while !rest.is_empty() {
            let fragment = rest.split_to(rest.len().min(max_frame_size));
            out.put(Self::encode_continuation_frame(&ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: rest.is_empty(),
            }));
        }
        out
    }

    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        if frame.ack {
            return Self::frame(FrameType::Settings, FrameFlags::from_u8(FrameFlags::ACK), 0, &[]);
        }
        let mut payload = BytesMut::with_capacity(frame.settings.encoded_len());
        frame.settings.encode(&mut payload);
        Self::frame(FrameType::Settings, FrameFlags::empty(), 0, &payload)
    }

    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };
        Self::frame(FrameType::Ping, flags, 0, &frame.data)
    }

    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let mut payload = BytesMut::with_capacity(8 + frame.debug_data.len());
        payload.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        payload.put_u32(frame.error_code.as_u32());
        payload.put_slice(&frame.debug_data);
        Self::frame(FrameType::Goaway, FrameFlags::empty(), 0, &payload)
    }

    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let increment = (frame.size_increment & 0x7FFF_FFFF).to_be_bytes();
        Self::frame(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, &increment)
    }

    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let code = frame.error_code.as_u32().to_be_bytes();
        Self::frame(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, &code)
    }

    /// Append bytes read from the session
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Peek at the buffered bytes, used to sniff a non-HTTP/2 reply
    pub fn buffer(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Pull the next complete frame out of the read buffer
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let (raw_type, flags, stream_id, payload_len) = Self::decode_header(&header);

        if payload_len > self.max_recv_frame_size {
            return Err(Error::FrameSize(format!(
                "Frame payload {} exceeds advertised maximum {}",
                payload_len, self.max_recv_frame_size
            )));
        }

        if self.read_buffer.len() < FRAME_HEADER_SIZE + payload_len {
            self.read_buffer
                .reserve(FRAME_HEADER_SIZE + payload_len - self.read_buffer.len());
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(payload_len).freeze();

        Ok(Some(Frame {
            raw_type,
            flags,
            stream_id,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::error::ErrorCode;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let (raw_type, decoded_flags, stream_id, length) = FrameCodec::decode_header(&header);

        assert_eq!(raw_type, FrameType::Headers.as_u8());
        assert_eq!(decoded_flags, flags);
        assert_eq!(stream_id, 42);
        assert_eq!(length, 1234);
    }

    #[test]
    fn test_encode_data_frame() {
        let encoded = FrameCodec::encode_data_frame(&DataFrame::new(1, Bytes::from("Hello"), true));

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::new(settings));

        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
        assert_eq!(encoded[0..3], [0, 0, 18]);

        let ack = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
        assert_eq!(ack[0..3], [0, 0, 0]);
        assert_eq!(ack[4], FrameFlags::ACK);
    }

    #[test]
    fn test_header_block_spills_into_continuation() {
        let block = Bytes::from(vec![0xAB; 40]);
        let encoded = FrameCodec::encode_header_block(7, block, false, 16);

        let mut codec = FrameCodec::new(16384);
        codec.feed(&encoded);

        let first = codec.next_frame().unwrap().unwrap();
        assert_eq!(first.frame_type(), Some(FrameType::Headers));
        assert!(!first.flags.is_end_headers());
        assert_eq!(first.payload.len(), 16);

        let second = codec.next_frame().unwrap().unwrap();
        assert_eq!(second.frame_type(), Some(FrameType::Continuation));
        assert!(!second.flags.is_end_headers());

        let third = codec.next_frame().unwrap().unwrap();
        assert!(third.flags.is_end_headers());
        assert_eq!(third.payload.len(), 8);
        assert!(codec.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_next_frame_waits_for_split_payload() {
        let encoded = FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id: 3,
            error_code: ErrorCode::Cancel,
        });
        let mut codec = FrameCodec::new(16384);

        codec.feed(&encoded[..5]);
        assert!(codec.next_frame().unwrap().is_none());
        codec.feed(&encoded[5..11]);
        assert!(codec.next_frame().unwrap().is_none());
        codec.feed(&encoded[11..]);

        let frame = codec.next_frame().unwrap().unwrap();
        let rst = RstStreamFrame::decode(&frame).unwrap();
        assert_eq!(rst.stream_id, 3);
        assert_eq!(rst.error_code, ErrorCode::Cancel);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = FrameCodec::new(16384);
        codec.feed(&FrameCodec::encode_header(
            FrameType::Data,
            FrameFlags::empty(),
            1,
            16385,
        ));
        assert!(matches!(codec.next_frame(), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_encode_window_update() {
        let encoded = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000));
        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);
        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }
}
