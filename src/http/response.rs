//! Streaming responses
//!
//! A [`StreamingResponse`] is the application's view of one in-flight
//! request. The connection's transport thread pushes status, headers and body
//! chunks into the paired [`ResponseSender`] as frames arrive; application
//! tasks pull them out with async accessors on whatever executor they run on.
//!
//! All shared state sits behind one mutex that is held only while a queue is
//! updated, never across an `.await`. Each pending accessor call owns a
//! oneshot channel, so resolving it from the transport thread never blocks.
//! A `next_chunk` call abandoned after its chunk was sent (by a timeout or a
//! `select!`) hands that chunk back, so no chunk is ever lost.
//!
//! State machine: `Pending -> HeadersReceived -> Streaming -> Completed`,
//! with `Failed` reachable from any non-terminal state. Both `Completed` and
//! `Failed` are terminal; later callbacks are ignored.

use super::headers::Headers;
use super::{Error, Result, TransportError};
use bytes::Bytes;
use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Lifecycle of a streaming response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Waiting for the response HEADERS
    Pending,
    /// Status and headers known, no body bytes yet
    HeadersReceived,
    /// At least one body chunk has arrived
    Streaming,
    /// The peer ended the stream
    Completed,
    /// Terminal transport failure
    Failed,
}

impl ResponseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseState::Completed | ResponseState::Failed)
    }
}

type Head = (u16, Headers);
type Waiter<T> = oneshot::Sender<std::result::Result<T, TransportError>>;

struct Inner {
    state: ResponseState,
    head: Option<Head>,
    head_waiters: Vec<Waiter<Head>>,
    /// Arrived but not yet consumed
    chunks: VecDeque<Bytes>,
    /// `next_chunk` calls still waiting, oldest first
    chunk_waiters: VecDeque<Waiter<Bytes>>,
    done_waiters: Vec<Waiter<()>>,
    failure: Option<TransportError>,
}

impl Inner {
    /// Hand `chunk` to the oldest caller still waiting, or give it back
    fn offer(&mut self, mut chunk: Bytes) -> Option<Bytes> {
        while let Some(waiter) = self.chunk_waiters.pop_front() {
            match waiter.send(Ok(chunk)) {
                Ok(()) => return None,
                // That caller stopped waiting; offer the chunk to the next one
                Err(Ok(returned)) => chunk = returned,
                Err(Err(_)) => return None,
            }
        }
        Some(chunk)
    }
}

type ReleaseFn = Box<dyn Fn(usize) + Send + Sync>;

struct Shared {
    inner: Mutex<Inner>,
    /// Hands consumed byte counts back to the transport's receive window
    release: Option<ReleaseFn>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section is a single queue push/pop, so a panic
        // elsewhere cannot leave the queues half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, len: usize) {
        if len > 0 {
            if let Some(release) = &self.release {
                release(len);
            }
        }
    }
}

/// Application side of an in-flight response
pub struct StreamingResponse {
    shared: Arc<Shared>,
}

/// Transport side of an in-flight response
///
/// Dropping it before the response reached a terminal state fails the
/// response with [`TransportError::ConnectionClosed`].
pub struct ResponseSender {
    shared: Arc<Shared>,
}

impl StreamingResponse {
    /// Create a connected sender/response pair with no flow-control hook
    pub fn channel() -> (ResponseSender, StreamingResponse) {
        Self::build(None)
    }

    /// Create a pair whose consumed chunk sizes are reported to `release`
    pub(crate) fn channel_with_release(
        release: impl Fn(usize) + Send + Sync + 'static,
    ) -> (ResponseSender, StreamingResponse) {
        Self::build(Some(Box::new(release)))
    }

    fn build(release: Option<ReleaseFn>) -> (ResponseSender, StreamingResponse) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ResponseState::Pending,
                head: None,
                head_waiters: Vec::new(),
                chunks: VecDeque::new(),
                chunk_waiters: VecDeque::new(),
                done_waiters: Vec::new(),
                failure: None,
            }),
            release,
        });
        (
            ResponseSender {
                shared: Arc::clone(&shared),
            },
            StreamingResponse { shared },
        )
    }

    pub fn state(&self) -> ResponseState {
        self.shared.lock().state
    }

    /// Response status code
    ///
    /// Resolves once the response HEADERS arrive; every call observes the
    /// same value.
    pub async fn status(&self) -> Result<u16> {
        self.head().await.map(|(status, _)| status)
    }

    /// Response headers, excluding pseudo-headers
    pub async fn headers(&self) -> Result<Headers> {
        self.head().await.map(|(_, headers)| headers)
    }

    async fn head(&self) -> Result<Head> {
        let rx = {
            let mut inner = self.shared.lock();
            if let Some(err) = &inner.failure {
                return Err(Error::Transport(err.clone()));
            }
            if let Some(head) = &inner.head {
                return Ok(head.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.head_waiters.push(tx);
            rx
        };
        await_waiter(rx).await
    }

    /// Next body chunk in arrival order
    ///
    /// An empty chunk means the body has ended; once returned, every later
    /// call returns an empty chunk too. After a transport failure every call
    /// returns that failure.
    ///
    /// Cancel safe: dropping the future never loses a chunk.
    pub async fn next_chunk(&self) -> Result<Bytes> {
        let waiter = {
            let mut inner = self.shared.lock();
            if let Some(err) = &inner.failure {
                return Err(Error::Transport(err.clone()));
            }
            if let Some(chunk) = inner.chunks.pop_front() {
                drop(inner);
                self.shared.release(chunk.len());
                return Ok(chunk);
            }
            if inner.state == ResponseState::Completed {
                return Ok(Bytes::new());
            }
            let (tx, rx) = oneshot::channel();
            inner.chunk_waiters.push_back(tx);
            ChunkWaiter {
                shared: Arc::clone(&self.shared),
                rx: Some(rx),
            }
        };
        waiter.recv().await
    }

    /// Wait until the peer has ended the stream
    pub async fn done(&self) -> Result<()> {
        let rx = {
            let mut inner = self.shared.lock();
            match inner.state {
                ResponseState::Completed => return Ok(()),
                ResponseState::Failed => {
                    if let Some(err) = &inner.failure {
                        return Err(Error::Transport(err.clone()));
                    }
                }
                _ => {}
            }
            let (tx, rx) = oneshot::channel();
            inner.done_waiters.push(tx);
            rx
        };
        await_waiter(rx).await
    }

    /// Drain the remaining body into one buffer
    pub async fn collect_body(&self) -> Result<Bytes> {
        let mut body = bytes::BytesMut::new();
        loop {
            let chunk = self.next_chunk().await?;
            if chunk.is_empty() {
                return Ok(body.freeze());
            }
            body.extend_from_slice(&chunk);
        }
    }
}

async fn await_waiter<T>(
    rx: oneshot::Receiver<std::result::Result<T, TransportError>>,
) -> Result<T> {
    match rx.await {
        Ok(result) => result.map_err(Error::Transport),
        // The sender resolves every waiter before it goes away
        Err(_) => Err(Error::Transport(TransportError::ConnectionClosed)),
    }
}

/// A `next_chunk` call waiting for the transport
///
/// Dropped before it finished, it puts a chunk already sent to it back at
/// the head of the response.
struct ChunkWaiter {
    shared: Arc<Shared>,
    rx: Option<oneshot::Receiver<std::result::Result<Bytes, TransportError>>>,
}

impl ChunkWaiter {
    async fn recv(mut self) -> Result<Bytes> {
        let received = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return Err(Error::Transport(TransportError::ConnectionClosed)),
        };
        self.rx = None;
        let chunk = match received {
            Ok(result) => result.map_err(Error::Transport)?,
            Err(_) => return Err(Error::Transport(TransportError::ConnectionClosed)),
        };
        self.shared.release(chunk.len());
        Ok(chunk)
    }
}

impl Drop for ChunkWaiter {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        // After close() the transport can no longer pick this waiter
        rx.close();
        let Ok(Ok(chunk)) = rx.try_recv() else {
            return;
        };
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.state == ResponseState::Failed {
            return;
        }
        trace!("returning chunk of an abandoned next_chunk call");
        if let Some(chunk) = inner.offer(chunk) {
            inner.chunks.push_front(chunk);
        }
    }
}

impl ResponseSender {
    pub fn state(&self) -> ResponseState {
        self.shared.lock().state
    }

    /// Deliver the response status and headers
    ///
    /// Only the first delivery counts; trailers and repeats are ignored.
    pub fn on_headers(&self, status: u16, headers: Headers) {
        let mut inner = self.shared.lock();
        if inner.state.is_terminal() || inner.head.is_some() {
            trace!("ignoring repeated response headers");
            return;
        }
        inner.state = ResponseState::HeadersReceived;
        for waiter in inner.head_waiters.drain(..) {
            let _ = waiter.send(Ok((status, headers.clone())));
        }
        inner.head = Some((status, headers));
    }

    /// Deliver one body chunk
    ///
    /// Empty chunks are dropped so they can never be mistaken for the end of
    /// the body.
    pub fn on_body(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = ResponseState::Streaming;
        if let Some(chunk) = inner.offer(chunk) {
            inner.chunks.push_back(chunk);
        }
    }

    /// The peer ended the stream
    ///
    /// Callers still waiting in `next_chunk` receive the empty end-of-body
    /// chunk.
    pub fn on_complete(&self) {
        let mut inner = self.shared.lock();
        if inner.state.is_terminal() {
            return;
        }
        if inner.head.is_none() {
            drop(inner);
            self.on_error(TransportError::Protocol(
                "stream ended before response headers".to_string(),
            ));
            return;
        }
        inner.state = ResponseState::Completed;
        for waiter in inner.chunk_waiters.drain(..) {
            let _ = waiter.send(Ok(Bytes::new()));
        }
        for waiter in inner.done_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Fail the response; every pending and future accessor call returns
    /// `err`
    pub fn on_error(&self, err: TransportError) {
        let mut inner = self.shared.lock();
        if inner.state.is_terminal() {
            return;
        }
        trace!("response failed: {}", err);
        inner.state = ResponseState::Failed;
        inner.chunks.clear();
        for waiter in inner.head_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for waiter in inner.chunk_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for waiter in inner.done_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        inner.failure = Some(err);
    }
}

impl Drop for ResponseSender {
    fn drop(&mut self) {
        self.on_error(TransportError::ConnectionClosed);
    }
}
