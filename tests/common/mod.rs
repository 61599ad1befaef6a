//! In-process HTTP/2 peer for integration tests
//!
//! Plays the server side of a connection with the crate's own frame codec
//! and the `hpack` crate, one blocking socket per test thread.

#![allow(dead_code)]

use bytes::Bytes;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use transcribe_stream::http::h2::codec::FrameCodec;
use transcribe_stream::http::h2::frames::{
    DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame, RstStreamFrame,
    SettingsFrame, WindowUpdateFrame,
};
use transcribe_stream::http::h2::{ErrorCode, Settings, CONNECTION_PREFACE};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Bind a listener on an ephemeral loopback port
pub fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Accept one TCP connection with test timeouts applied
pub fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream.set_write_timeout(Some(TIMEOUT)).unwrap();
    stream
}

/// A request as the peer saw it
#[derive(Debug)]
pub struct ReceivedHeaders {
    pub stream_id: u32,
    pub fields: Vec<(String, String)>,
    pub end_stream: bool,
}

impl ReceivedHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What [`Peer::next_event`] observed
#[derive(Debug)]
pub enum PeerEvent {
    Headers(ReceivedHeaders),
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    RstStream {
        stream_id: u32,
        code: ErrorCode,
    },
    Goaway {
        code: ErrorCode,
    },
    /// The client closed its side of the socket
    Closed,
}

/// Server side of one HTTP/2 connection
pub struct Peer<S: Read + Write> {
    stream: S,
    codec: FrameCodec,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
}

impl<S: Read + Write> Peer<S> {
    /// Send our SETTINGS, then read the client preface and SETTINGS
    pub fn handshake(stream: S, settings: Settings) -> Self {
        let mut peer = Peer {
            stream,
            codec: FrameCodec::new(1 << 24),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
        };
        peer.write(&FrameCodec::encode_settings_frame(&SettingsFrame::new(settings)));

        let mut preface = [0u8; 24];
        peer.stream.read_exact(&mut preface).unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);

        let frame = peer.read_frame().expect("client SETTINGS");
        assert_eq!(frame.frame_type(), Some(FrameType::Settings));
        assert!(!frame.flags.is_ack());
        peer.write(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        peer
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    /// Next raw frame, or None at end of stream
    pub fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.codec.next_frame().unwrap() {
                return Some(frame);
            }
            let mut buf = [0u8; 16384];
            match self.stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => self.codec.feed(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return None,
                Err(e) => panic!("peer read failed: {}", e),
            }
        }
    }

    /// Next frame worth a test's attention
    ///
    /// SETTINGS are acknowledged and PINGs answered along the way.
    pub fn next_event(&mut self) -> PeerEvent {
        loop {
            let Some(frame) = self.read_frame() else {
                return PeerEvent::Closed;
            };
            match frame.frame_type() {
                Some(FrameType::Headers) => {
                    let headers = HeadersFrame::decode(frame).unwrap();
                    let mut block = headers.header_block.to_vec();
                    let mut end_headers = headers.end_headers;
                    while !end_headers {
                        let next = self.read_frame().expect("CONTINUATION");
                        assert_eq!(next.frame_type(), Some(FrameType::Continuation));
                        block.extend_from_slice(&next.payload);
                        end_headers = next.flags.is_end_headers();
                    }
                    let fields = self
                        .decoder
                        .decode(&block)
                        .unwrap()
                        .into_iter()
                        .map(|(n, v)| {
                            (
                                String::from_utf8(n).unwrap(),
                                String::from_utf8(v).unwrap(),
                            )
                        })
                        .collect();
                    return PeerEvent::Headers(ReceivedHeaders {
                        stream_id: headers.stream_id,
                        fields,
                        end_stream: headers.end_stream,
                    });
                }
                Some(FrameType::Data) => {
                    let data = DataFrame::decode(frame).unwrap();
                    return PeerEvent::Data {
                        stream_id: data.stream_id,
                        data: data.data,
                        end_stream: data.end_stream,
                    };
                }
                Some(FrameType::WindowUpdate) => {
                    let update = WindowUpdateFrame::decode(&frame).unwrap();
                    return PeerEvent::WindowUpdate {
                        stream_id: update.stream_id,
                        increment: update.size_increment,
                    };
                }
                Some(FrameType::RstStream) => {
                    let rst = RstStreamFrame::decode(&frame).unwrap();
                    return PeerEvent::RstStream {
                        stream_id: rst.stream_id,
                        code: rst.error_code,
                    };
                }
                Some(FrameType::Goaway) => {
                    let goaway = GoawayFrame::decode(&frame).unwrap();
                    return PeerEvent::Goaway {
                        code: goaway.error_code,
                    };
                }
                Some(FrameType::Settings) => {
                    if !frame.flags.is_ack() {
                        self.write(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
                    }
                }
                Some(FrameType::Ping) => {
                    let ping = PingFrame::decode(&frame).unwrap();
                    if !ping.ack {
                        self.write(&FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)));
                    }
                }
                _ => {}
            }
        }
    }

    /// Skip window updates until the next request HEADERS
    pub fn expect_headers(&mut self) -> ReceivedHeaders {
        loop {
            match self.next_event() {
                PeerEvent::Headers(headers) => return headers,
                PeerEvent::WindowUpdate { .. } => {}
                other => panic!("expected HEADERS, got {:?}", other),
            }
        }
    }

    /// Collect a request body until END_STREAM, reopening both windows as
    /// data arrives
    pub fn read_body(&mut self, stream_id: u32) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match self.next_event() {
                PeerEvent::Data {
                    stream_id: id,
                    data,
                    end_stream,
                } if id == stream_id => {
                    body.extend_from_slice(&data);
                    if !data.is_empty() {
                        self.send_window_update(0, data.len() as u32);
                        if !end_stream {
                            self.send_window_update(stream_id, data.len() as u32);
                        }
                    }
                    if end_stream {
                        return body;
                    }
                }
                PeerEvent::WindowUpdate { .. } => {}
                other => panic!("expected DATA on stream {}, got {:?}", stream_id, other),
            }
        }
    }

    pub fn send_headers(&mut self, stream_id: u32, status: u16, headers: &[(&str, &str)], end_stream: bool) {
        let status = status.to_string();
        let mut fields: Vec<(&[u8], &[u8])> = vec![(&b":status"[..], status.as_bytes())];
        fields.extend(headers.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));
        let block = self.encoder.encode(fields);
        let frame = HeadersFrame::new(stream_id, Bytes::from(block), end_stream, true);
        self.write(&FrameCodec::encode_headers_frame(&frame));
    }

    pub fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        let frame = DataFrame::new(stream_id, Bytes::copy_from_slice(data), end_stream);
        self.write(&FrameCodec::encode_data_frame(&frame));
    }

    pub fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        let frame = WindowUpdateFrame::new(stream_id, increment);
        self.write(&FrameCodec::encode_window_update_frame(&frame));
    }

    pub fn send_rst_stream(&mut self, stream_id: u32, code: ErrorCode) {
        let frame = RstStreamFrame {
            stream_id,
            error_code: code,
        };
        self.write(&FrameCodec::encode_rst_stream_frame(&frame));
    }

    pub fn send_goaway(&mut self, last_stream_id: u32, code: ErrorCode) {
        let frame = GoawayFrame::new(last_stream_id, code, Bytes::new());
        self.write(&FrameCodec::encode_goaway_frame(&frame));
    }

    /// Wait until the client closes the connection
    pub fn drain_until_closed(&mut self) {
        while self.read_frame().is_some() {}
    }
}
