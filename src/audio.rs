//! Outbound audio
//!
//! An [`AudioStream`] is the producer side of a transcription request body.
//! Every [`send`](AudioStream::send) frames one chunk of audio as an
//! `AudioEvent` message and queues it for the connection; the connection
//! writes queued events in order as the peer grants flow-control window.

use crate::eventstream;
use crate::http::{body_channel, BodySender, BodyStream};
use crate::Result;
use bytes::Bytes;
use log::trace;

/// Producer of `AudioEvent` messages for one request
pub struct AudioStream {
    body: BodySender,
    sent: u64,
}

impl AudioStream {
    /// Create an audio stream and the request body it feeds
    ///
    /// At most `capacity` events wait between producer and transport;
    /// `send` suspends while the queue is full.
    pub fn channel(capacity: usize) -> (AudioStream, BodyStream) {
        let (body, stream) = body_channel(capacity);
        (AudioStream { body, sent: 0 }, stream)
    }

    /// Frame `audio` as an `AudioEvent` and queue it
    ///
    /// Fails with [`http::Error::StreamClosed`](crate::http::Error::StreamClosed)
    /// after [`close`](Self::close) or once the request has ended.
    pub async fn send(&mut self, audio: impl Into<Bytes>) -> Result<()> {
        let frame = eventstream::audio_event(audio.into()).encode()?;
        self.send_frame(frame).await
    }

    /// Queue an already framed message
    pub async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        let len = frame.len();
        self.body.send(frame).await?;
        self.sent += 1;
        trace!("audio event {} queued ({} bytes)", self.sent, len);
        Ok(())
    }

    /// End the input
    ///
    /// The request body ends after the events already queued, which lets
    /// the service finish its results.
    pub fn close(&mut self) {
        self.body.close();
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_closed()
    }

    /// Number of events queued so far
    pub fn events_sent(&self) -> u64 {
        self.sent
    }
}
