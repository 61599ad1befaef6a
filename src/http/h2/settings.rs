//! HTTP/2 settings management
//!
//! SETTINGS parameters exchanged during connection setup
//! (RFC 7540 Section 6.5).

use super::error::{Error, Result};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings
///
/// Each field is `None` when the parameter was not sent, in which case the
/// protocol default applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Parse a SETTINGS payload
    ///
    /// Unknown identifiers are ignored per RFC 7540 Section 6.5.2.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload length {} is not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        let mut buf = payload;
        while buf.has_remaining() {
            let id = buf.get_u16();
            let value = buf.get_u32();
            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::HeaderTableSize) => settings.header_table_size = Some(value),
                Some(SettingsParameter::EnablePush) => {
                    if value > 1 {
                        return Err(Error::InvalidSettings(format!(
                            "ENABLE_PUSH must be 0 or 1, got {}",
                            value
                        )));
                    }
                    settings.enable_push = Some(value == 1);
                }
                Some(SettingsParameter::MaxConcurrentStreams) => {
                    settings.max_concurrent_streams = Some(value)
                }
                Some(SettingsParameter::InitialWindowSize) => settings.initial_window_size = Some(value),
                Some(SettingsParameter::MaxFrameSize) => settings.max_frame_size = Some(value),
                Some(SettingsParameter::MaxHeaderListSize) => {
                    settings.max_header_list_size = Some(value)
                }
                None => {}
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Serialize the parameters that are set into a SETTINGS payload
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut put = |param: SettingsParameter, value: Option<u32>| {
            if let Some(value) = value {
                buf.put_u16(param.as_u16());
                buf.put_u32(value);
            }
        };
        put(SettingsParameter::HeaderTableSize, self.header_table_size);
        put(SettingsParameter::EnablePush, self.enable_push.map(u32::from));
        put(SettingsParameter::MaxConcurrentStreams, self.max_concurrent_streams);
        put(SettingsParameter::InitialWindowSize, self.initial_window_size);
        put(SettingsParameter::MaxFrameSize, self.max_frame_size);
        put(SettingsParameter::MaxHeaderListSize, self.max_header_list_size);
    }

    /// Number of bytes [`Settings::encode`] will write
    pub fn encoded_len(&self) -> usize {
        let count = [
            self.header_table_size.is_some(),
            self.enable_push.is_some(),
            self.max_concurrent_streams.is_some(),
            self.initial_window_size.is_some(),
            self.max_frame_size.is_some(),
            self.max_header_list_size.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        count * 6
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > 0x7FFFFFFF {
                return Err(Error::FlowControl(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        if let Some(max_frame_size) = self.max_frame_size {
            if !(16384..=16777215).contains(&max_frame_size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Overlay the parameters present in `other`
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
    }
}

/// Builder for HTTP/2 settings
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_then_decode_preserves_set_fields() {
        let settings = SettingsBuilder::new()
            .enable_push(false)
            .initial_window_size(1 << 20)
            .max_frame_size(32768)
            .build()
            .unwrap();

        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        assert_eq!(buf.len(), settings.encoded_len());
        assert_eq!(buf.len(), 18);

        let decoded = Settings::decode(&buf).unwrap();
        assert_eq!(decoded, settings);
        assert_eq!(decoded.get_header_table_size(), DEFAULT_HEADER_TABLE_SIZE);
    }

    #[test]
    fn test_unknown_parameter_is_ignored() {
        let payload = [0x00, 0x08, 0, 0, 0, 1, 0x00, 0x03, 0, 0, 0, 100];
        let decoded = Settings::decode(&payload).unwrap();
        assert_eq!(decoded.max_concurrent_streams, Some(100));
    }

    #[test]
    fn test_ragged_payload_is_frame_size_error() {
        assert!(matches!(
            Settings::decode(&[0, 1, 0, 0]),
            Err(Error::FrameSize(_))
        ));
    }

    #[test]
    fn test_settings_validation() {
        assert!(SettingsBuilder::new().initial_window_size(0x80000000).build().is_err());
        assert!(SettingsBuilder::new().max_frame_size(1024).build().is_err());
        assert!(SettingsBuilder::new().max_frame_size(16777216).build().is_err());
        assert!(Settings::decode(&[0, 2, 0, 0, 0, 2]).is_err());
    }

    #[test]
    fn test_settings_merge() {
        let mut local = SettingsBuilder::new().header_table_size(4096).build().unwrap();
        let remote = SettingsBuilder::new()
            .header_table_size(8192)
            .max_concurrent_streams(100)
            .build()
            .unwrap();

        local.merge(&remote);

        assert_eq!(local.get_header_table_size(), 8192);
        assert_eq!(local.max_concurrent_streams, Some(100));
    }
}
