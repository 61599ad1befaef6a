//! Incremental message decoding
//!
//! Chunk boundaries of a response body have nothing to do with message
//! boundaries. [`MessageDecoder`] buffers whatever it is fed and hands out
//! messages as soon as they are complete:
//!
//! ```text
//! feed(chunk) --> [ awaiting prelude ] --12 bytes--> [ awaiting body(total) ] --total bytes--> Message
//!                        ^                                                            |
//!                        +------------------------------------------------------------+
//! ```
//!
//! The first invalid message poisons the decoder: the byte stream has lost
//! its framing and nothing after it can be trusted.

use super::message::{parse_prelude, Message};
use super::{Error, Result, PRELUDE_LEN};
use bytes::BytesMut;
use log::warn;

/// Reassembles messages from arbitrarily split input
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: BytesMut,
    /// Total length of the message being assembled, once its prelude is in
    expected: Option<usize>,
    failed: bool,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk of input
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held that do not form a complete message yet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete message, if any
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.failed {
            return Err(Error::Corrupt);
        }
        let result = self.decode_next();
        if let Err(e) = &result {
            warn!("event stream decode failed: {}", e);
            self.failed = true;
            self.buffer.clear();
            self.expected = None;
        }
        result
    }

    fn decode_next(&mut self) -> Result<Option<Message>> {
        let total = match self.expected {
            Some(total) => total,
            None => {
                if self.buffer.len() < PRELUDE_LEN {
                    return Ok(None);
                }
                let (total, _) = parse_prelude(&self.buffer[..PRELUDE_LEN])?;
                self.expected = Some(total);
                total
            }
        };

        if self.buffer.len() < total {
            return Ok(None);
        }
        self.expected = None;
        let frame = self.buffer.split_to(total).freeze();
        Message::decode(frame).map(Some)
    }

    /// Check that input ended on a message boundary
    pub fn finish(&self) -> Result<()> {
        if self.failed {
            return Err(Error::Corrupt);
        }
        if !self.buffer.is_empty() {
            return Err(Error::UnexpectedEof(self.buffer.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstream::{audio_event, HeaderValue};
    use bytes::Bytes;

    fn frames() -> (Message, Message, Vec<u8>) {
        let f1 = audio_event(Bytes::from_static(b"F1 audio"));
        let f2 = Message::new(Bytes::from_static(b"second"))
            .with_header(":event-type", HeaderValue::String("F2".to_string()));
        let mut wire = f1.encode().unwrap().to_vec();
        wire.extend_from_slice(&f2.encode().unwrap());
        (f1, f2, wire)
    }

    fn drain(decoder: &mut MessageDecoder) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(message) = decoder.next_message().unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_any_chunking_recovers_frames_in_order() {
        let (f1, f2, wire) = frames();

        for chunk_size in [1, 2, 3, 7, 11, 12, 13, 40, wire.len()] {
            let mut decoder = MessageDecoder::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                decoder.feed(chunk);
                decoded.extend(drain(&mut decoder));
            }
            assert_eq!(decoded, vec![f1.clone(), f2.clone()], "chunk size {}", chunk_size);
            decoder.finish().unwrap();
        }
    }

    #[test]
    fn test_partial_frame_carries_over() {
        let (f1, f2, wire) = frames();
        let f1_len = f1.encode().unwrap().len();

        // First chunk: all of F1 plus the first bytes of F2
        let mut decoder = MessageDecoder::new();
        decoder.feed(&wire[..f1_len + 5]);
        assert_eq!(drain(&mut decoder), vec![f1]);
        assert_eq!(decoder.buffered(), 5);
        assert!(matches!(decoder.finish(), Err(Error::UnexpectedEof(5))));

        decoder.feed(&wire[f1_len + 5..]);
        assert_eq!(drain(&mut decoder), vec![f2]);
        decoder.finish().unwrap();
    }

    #[test]
    fn test_corruption_poisons_decoder() {
        let (_, _, mut wire) = frames();
        wire[20] ^= 0x55;

        let mut decoder = MessageDecoder::new();
        decoder.feed(&wire);
        assert!(matches!(
            decoder.next_message(),
            Err(Error::MessageChecksum { .. })
        ));
        assert!(matches!(decoder.next_message(), Err(Error::Corrupt)));
        assert!(matches!(decoder.finish(), Err(Error::Corrupt)));
    }
}
