//! Event-stream messages and their headers

use super::{
    Error, Result, MAX_HEADERS_LEN, MAX_MESSAGE_LEN, MIN_MESSAGE_LEN, PRELUDE_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Typed header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteArray(Bytes),
    String(String),
    /// Milliseconds since the Unix epoch
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    /// Wire type tag
    pub fn type_id(&self) -> u8 {
        match self {
            HeaderValue::Bool(true) => 0,
            HeaderValue::Bool(false) => 1,
            HeaderValue::Byte(_) => 2,
            HeaderValue::Int16(_) => 3,
            HeaderValue::Int32(_) => 4,
            HeaderValue::Int64(_) => 5,
            HeaderValue::ByteArray(_) => 6,
            HeaderValue::String(_) => 7,
            HeaderValue::Timestamp(_) => 8,
            HeaderValue::Uuid(_) => 9,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.type_id());
        match self {
            HeaderValue::Bool(_) => {}
            HeaderValue::Byte(v) => buf.put_i8(*v),
            HeaderValue::Int16(v) => buf.put_i16(*v),
            HeaderValue::Int32(v) => buf.put_i32(*v),
            HeaderValue::Int64(v) | HeaderValue::Timestamp(v) => buf.put_i64(*v),
            HeaderValue::ByteArray(v) => put_sized(buf, v)?,
            HeaderValue::String(v) => put_sized(buf, v.as_bytes())?,
            HeaderValue::Uuid(v) => buf.put_slice(v),
        }
        Ok(())
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let value = match take(buf, 1)?[0] {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(buf, 1)?.get_i8()),
            3 => HeaderValue::Int16(take(buf, 2)?.get_i16()),
            4 => HeaderValue::Int32(take(buf, 4)?.get_i32()),
            5 => HeaderValue::Int64(take(buf, 8)?.get_i64()),
            6 => {
                let len = take(buf, 2)?.get_u16() as usize;
                HeaderValue::ByteArray(Bytes::copy_from_slice(take(buf, len)?))
            }
            7 => {
                let len = take(buf, 2)?.get_u16() as usize;
                let value = std::str::from_utf8(take(buf, len)?)
                    .map_err(|_| Error::InvalidHeader("string value is not UTF-8".to_string()))?;
                HeaderValue::String(value.to_string())
            }
            8 => HeaderValue::Timestamp(take(buf, 8)?.get_i64()),
            9 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(take(buf, 16)?);
                HeaderValue::Uuid(uuid)
            }
            other => return Err(Error::InvalidHeaderType(other)),
        };
        Ok(value)
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Bool(v) => write!(f, "{}", v),
            HeaderValue::Byte(v) => write!(f, "{}", v),
            HeaderValue::Int16(v) => write!(f, "{}", v),
            HeaderValue::Int32(v) => write!(f, "{}", v),
            HeaderValue::Int64(v) | HeaderValue::Timestamp(v) => write!(f, "{}", v),
            HeaderValue::ByteArray(v) => write!(f, "<{} bytes>", v.len()),
            HeaderValue::String(v) => f.write_str(v),
            HeaderValue::Uuid(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// One named header of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

impl Header {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let name = self.name.as_bytes();
        if name.is_empty() || name.len() > u8::MAX as usize {
            return Err(Error::InvalidHeader(format!(
                "name {:?} must be 1 to 255 bytes",
                self.name
            )));
        }
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        self.value.encode(buf)
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let len = take(buf, 1)?[0] as usize;
        if len == 0 {
            return Err(Error::InvalidHeader("empty name".to_string()));
        }
        let name = std::str::from_utf8(take(buf, len)?)
            .map_err(|_| Error::InvalidHeader("name is not UTF-8".to_string()))?
            .to_string();
        let value = HeaderValue::decode(buf)?;
        Ok(Header { name, value })
    }
}

/// A complete event-stream message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    headers: Vec<Header>,
    payload: Bytes,
}

impl Message {
    pub fn new(payload: Bytes) -> Self {
        Message {
            headers: Vec::new(),
            payload,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: HeaderValue) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.headers.push(Header {
            name: name.into(),
            value,
        });
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First header named `name`
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| &h.value)
    }

    /// Value of a string header
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Serialize into a self-delimiting frame
    pub fn encode(&self) -> Result<Bytes> {
        let mut headers = BytesMut::new();
        for header in &self.headers {
            header.encode(&mut headers)?;
        }
        if headers.len() > MAX_HEADERS_LEN {
            return Err(Error::HeadersTooLong(headers.len()));
        }

        let total = MIN_MESSAGE_LEN + headers.len() + self.payload.len();
        if total > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLong(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(total as u32);
        buf.put_u32(headers.len() as u32);
        let prelude_crc = crc32fast::hash(&buf[..8]);
        buf.put_u32(prelude_crc);
        buf.put_slice(&headers);
        buf.put_slice(&self.payload);
        let message_crc = crc32fast::hash(&buf);
        buf.put_u32(message_crc);
        Ok(buf.freeze())
    }

    /// Parse exactly one complete message
    pub fn decode(data: Bytes) -> Result<Self> {
        if data.len() < MIN_MESSAGE_LEN {
            return Err(Error::InvalidLength(data.len()));
        }
        let (total, headers_len) = parse_prelude(&data[..PRELUDE_LEN])?;
        if total != data.len() {
            return Err(Error::InvalidLength(total));
        }

        let body_end = total - 4;
        let expected = (&data[body_end..]).get_u32();
        let computed = crc32fast::hash(&data[..body_end]);
        if expected != computed {
            return Err(Error::MessageChecksum { expected, computed });
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let mut section = &data[PRELUDE_LEN..headers_end];
        let mut headers = Vec::new();
        while !section.is_empty() {
            headers.push(Header::decode(&mut section)?);
        }

        Ok(Message {
            headers,
            payload: data.slice(headers_end..body_end),
        })
    }
}

/// Validate a 12-byte prelude, returning (total length, headers length)
pub(crate) fn parse_prelude(mut prelude: &[u8]) -> Result<(usize, usize)> {
    let computed = crc32fast::hash(&prelude[..8]);
    let total = prelude.get_u32() as usize;
    let headers_len = prelude.get_u32() as usize;
    let expected = prelude.get_u32();

    if expected != computed {
        return Err(Error::PreludeChecksum { expected, computed });
    }
    if total > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLong(total));
    }
    if headers_len > MAX_HEADERS_LEN {
        return Err(Error::HeadersTooLong(headers_len));
    }
    if total < MIN_MESSAGE_LEN + headers_len {
        return Err(Error::InvalidLength(total));
    }
    Ok((total, headers_len))
}

fn put_sized(buf: &mut BytesMut, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::InvalidHeader(format!("value of {} bytes is too long", value.len())))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

/// Split `n` bytes off the front of `buf`
fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::InvalidHeader("truncated header".to_string()));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new(Bytes::from_static(b"{\"Transcript\":{}}"))
            .with_header(":message-type", HeaderValue::String("event".to_string()))
            .with_header(":event-type", HeaderValue::String("TranscriptEvent".to_string()))
            .with_header("flag", HeaderValue::Bool(false))
            .with_header("seq", HeaderValue::Int32(-7))
            .with_header("at", HeaderValue::Timestamp(1_700_000_000_000))
            .with_header("id", HeaderValue::Uuid([0xab; 16]))
            .with_header("raw", HeaderValue::ByteArray(Bytes::from_static(&[0, 1, 2])))
    }

    #[test]
    fn test_encode_layout() {
        let wire = Message::new(Bytes::from_static(b"abc")).encode().unwrap();
        assert_eq!(wire.len(), MIN_MESSAGE_LEN + 3);
        assert_eq!(&wire[..4], &(19u32).to_be_bytes());
        assert_eq!(&wire[4..8], &[0, 0, 0, 0]);
        assert_eq!(&wire[8..12], &crc32fast::hash(&wire[..8]).to_be_bytes());
        assert_eq!(&wire[12..15], b"abc");
        assert_eq!(&wire[15..], &crc32fast::hash(&wire[..15]).to_be_bytes());
    }

    #[test]
    fn test_decode_every_header_type() {
        let message = sample();
        let decoded = Message::decode(message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.header_str(":event-type"), Some("TranscriptEvent"));
        assert_eq!(decoded.header("seq"), Some(&HeaderValue::Int32(-7)));
        assert_eq!(decoded.header_str("seq"), None);
    }

    #[test]
    fn test_corrupted_payload_fails_message_checksum() {
        let mut wire = BytesMut::from(&sample().encode().unwrap()[..]);
        let last_payload = wire.len() - 5;
        wire[last_payload] ^= 0xff;
        assert!(matches!(
            Message::decode(wire.freeze()),
            Err(Error::MessageChecksum { .. })
        ));
    }

    #[test]
    fn test_corrupted_length_fails_prelude_checksum() {
        let mut wire = BytesMut::from(&sample().encode().unwrap()[..]);
        wire[3] ^= 0x01;
        assert!(matches!(
            Message::decode(wire.freeze()),
            Err(Error::PreludeChecksum { .. })
        ));
    }

    #[test]
    fn test_unknown_header_type() {
        let mut headers = BytesMut::new();
        headers.put_u8(1);
        headers.put_slice(b"x");
        headers.put_u8(42);

        let total = MIN_MESSAGE_LEN + headers.len();
        let mut wire = BytesMut::new();
        wire.put_u32(total as u32);
        wire.put_u32(headers.len() as u32);
        let crc = crc32fast::hash(&wire);
        wire.put_u32(crc);
        wire.put_slice(&headers);
        let crc = crc32fast::hash(&wire);
        wire.put_u32(crc);

        assert!(matches!(
            Message::decode(wire.freeze()),
            Err(Error::InvalidHeaderType(42))
        ));
    }

    #[test]
    fn test_limits() {
        let too_big = Message::new(Bytes::from(vec![0u8; MAX_MESSAGE_LEN]));
        assert!(matches!(too_big.encode(), Err(Error::MessageTooLong(_))));

        let long_name = Message::new(Bytes::new()).with_header("n".repeat(256), HeaderValue::Bool(true));
        assert!(matches!(long_name.encode(), Err(Error::InvalidHeader(_))));
    }
}
