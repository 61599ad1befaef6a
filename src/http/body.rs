//! Streaming request bodies
//!
//! [`body_channel`] creates a bounded FIFO between the application and a
//! connection's transport thread. The application awaits
//! [`BodySender::send`]; the transport drains the [`BodyStream`] without
//! blocking whenever the stream's flow-control window has room. Because the
//! channel is bounded, `send` suspends while the peer is not granting
//! window, and resumes as soon as the transport takes the next buffer.

use super::session::Waker;
use super::{Error, Result};
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Wakeup slot shared by both ends; filled once the body is attached to a
/// connection
#[derive(Default)]
struct Notify {
    waker: Mutex<Option<Arc<Waker>>>,
}

impl Notify {
    fn wake(&self) {
        let waker = self.waker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(waker) = waker.as_ref() {
            waker.wake();
        }
    }
}

/// Producer end of a request body
pub struct BodySender {
    tx: Option<mpsc::Sender<Bytes>>,
    notify: Arc<Notify>,
}

/// Consumer end of a request body, owned by the transport
pub struct BodyStream {
    rx: mpsc::Receiver<Bytes>,
    notify: Arc<Notify>,
}

/// Result of a non-blocking poll of a [`BodyStream`]
#[derive(Debug, PartialEq, Eq)]
pub enum BodyPoll {
    Data(Bytes),
    /// Nothing queued yet
    Pending,
    /// The sender closed the body
    Finished,
}

/// Create a body channel holding at most `capacity` unsent buffers
pub fn body_channel(capacity: usize) -> (BodySender, BodyStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let notify = Arc::new(Notify::default());
    (
        BodySender {
            tx: Some(tx),
            notify: Arc::clone(&notify),
        },
        BodyStream { rx, notify },
    )
}

impl BodySender {
    /// Queue one buffer for the wire
    ///
    /// Buffers reach the wire in the order they were sent. Fails with
    /// [`Error::StreamClosed`] after [`close`](Self::close) or once the
    /// request stream has ended.
    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::StreamClosed)?;
        tx.send(data).await.map_err(|_| Error::StreamClosed)?;
        self.notify.wake();
        Ok(())
    }

    /// End the body; the transport finishes the stream once earlier buffers
    /// are written
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            self.notify.wake();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for BodySender {
    fn drop(&mut self) {
        self.close();
    }
}

impl BodyStream {
    /// A body that is already complete
    pub fn full(data: Bytes) -> Self {
        let (mut sender, stream) = body_channel(1);
        if !data.is_empty() {
            if let Some(tx) = &sender.tx {
                // Fresh channel with one free slot
                let _ = tx.try_send(data);
            }
        }
        sender.close();
        stream
    }

    /// Register the connection to wake when data is queued
    pub(crate) fn attach(&self, waker: Arc<Waker>) {
        *self
            .notify
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(waker);
    }

    /// Take the next buffer without blocking
    pub fn poll_next(&mut self) -> BodyPoll {
        match self.rx.try_recv() {
            Ok(data) => BodyPoll::Data(data),
            Err(TryRecvError::Empty) => BodyPoll::Pending,
            Err(TryRecvError::Disconnected) => BodyPoll::Finished,
        }
    }
}
