//! HTTP/2 stream management
//!
//! This module implements stream management as defined in RFC 7540 Section 5.1
//! for the client side of a connection. Each [`H2Stream`] ties the protocol
//! state of one request to the [`ResponseSender`] that feeds its
//! application-facing response and to the body it is uploading.

use super::error::{Error, Result};
use super::flow_control::StreamFlowControl;
use crate::http::body::BodyStream;
use crate::http::response::ResponseSender;
use crate::http::TransportError;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
///
/// Push is disabled, so the reserved states never occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 stream
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    pub flow: StreamFlowControl,
    response: ResponseSender,
    /// Request body still being uploaded
    body: Option<BodyStream>,
    /// Part of a body buffer that did not fit in the send windows
    pending: Option<Bytes>,
    /// Whether the final (non-1xx) response HEADERS arrived
    head_received: bool,
}

impl H2Stream {
    pub fn new(
        id: StreamId,
        send_window: u32,
        recv_window: u32,
        response: ResponseSender,
        body: Option<BodyStream>,
    ) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow: StreamFlowControl::with_initial_sizes(send_window, recv_window),
            response,
            body,
            pending: None,
            head_received: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn response(&self) -> &ResponseSender {
        &self.response
    }

    pub fn head_received(&self) -> bool {
        self.head_received
    }

    pub fn set_head_received(&mut self) {
        self.head_received = true;
    }

    /// Whether a request body still has bytes (or its END_STREAM) to write
    pub fn has_outbound(&self) -> bool {
        self.state.can_send() && (self.body.is_some() || self.pending.is_some())
    }

    pub fn body_mut(&mut self) -> Option<&mut BodyStream> {
        self.body.as_mut()
    }

    pub fn take_pending(&mut self) -> Option<Bytes> {
        self.pending.take()
    }

    pub fn set_pending(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.pending = Some(data);
        }
    }

    /// Record the request HEADERS being written
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
                Ok(())
            }
            _ => Err(Error::Protocol(format!(
                "Cannot send HEADERS in state {:?}",
                self.state
            ))),
        }
    }

    /// Record our END_STREAM; the body is finished
    pub fn send_end_stream(&mut self) {
        self.body = None;
        self.pending = None;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Account for an inbound HEADERS block
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    /// Account for an inbound DATA frame against the stream window
    pub fn recv_data(&mut self, flow_len: usize, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }
        if !self.head_received {
            return Err(Error::Protocol(format!(
                "DATA before HEADERS on stream {}",
                self.id
            )));
        }
        self.flow.recv.receive(flow_len)?;
        if end_stream {
            self.recv_end_stream();
        }
        Ok(())
    }

    fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Close the stream without further frames
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
        self.body = None;
        self.pending = None;
    }

    /// Close the stream and fail its response
    pub fn fail(mut self, err: TransportError) {
        self.close();
        self.response.on_error(err);
    }
}

/// Stream manager
///
/// Tracks the client-initiated streams of one connection, ordered by ID so
/// bodies are flushed in the order requests were opened.
pub struct StreamManager {
    streams: BTreeMap<StreamId, H2Stream>,
    /// Maximum number of concurrent streams (from SETTINGS)
    max_concurrent_streams: Option<u32>,
}

impl StreamManager {
    pub fn new() -> Self {
        StreamManager {
            streams: BTreeMap::new(),
            max_concurrent_streams: None,
        }
    }

    /// Set maximum concurrent streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Whether another stream may be opened under the peer's limit
    pub fn can_open(&self) -> bool {
        match self.max_concurrent_streams {
            Some(max) => self.active_stream_count() < max as usize,
            None => true,
        }
    }

    pub fn insert(&mut self, stream: H2Stream) -> Result<()> {
        if !self.can_open() {
            return Err(Error::TooManyStreams);
        }
        self.streams.insert(stream.id(), stream);
        Ok(())
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H2Stream> {
        self.streams.values_mut()
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Get all stream IDs
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    /// Remove every stream with an ID above `last_stream_id`
    pub fn split_off_above(&mut self, last_stream_id: StreamId) -> Vec<H2Stream> {
        self.streams
            .split_off(&last_stream_id.saturating_add(1))
            .into_values()
            .collect()
    }

    /// Remove every stream
    pub fn drain(&mut self) -> Vec<H2Stream> {
        std::mem::take(&mut self.streams).into_values().collect()
    }

    /// Clean up closed streams
    pub fn cleanup_closed_streams(&mut self) {
        self.streams.retain(|_, stream| !stream.state().is_closed());
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}
