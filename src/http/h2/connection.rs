//! HTTP/2 connections
//!
//! A [`Connection`] is the application's handle to one negotiated HTTP/2
//! connection. All protocol work happens on a dedicated transport thread
//! owned by the connection:
//!
//! 1. connect, negotiate HTTP/2 (ALPN `h2` or prior knowledge) and exchange
//!    SETTINGS, reporting the outcome to the task awaiting
//!    [`Connection::connect`]
//! 2. loop: take commands from handles, open queued streams, write request
//!    body data the flow-control windows allow, wait for the socket (or a
//!    wakeup), decode frames and push results into each stream's
//!    [`ResponseSender`]
//! 3. on exit, fail every outstanding response so no awaiting task hangs
//!
//! Handles talk to the thread over a channel plus a wake pipe, so neither
//! side ever blocks on the other.

use super::codec::FrameCodec;
use super::error::{Error as H2Error, ErrorCode};
use super::flow_control::ConnectionFlowControl;
use super::frames::{
    DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame, RstStreamFrame,
    SettingsFrame, WindowUpdateFrame,
};
use super::settings::Settings;
use super::stream::{H2Stream, StreamId, StreamManager};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, MAX_STREAM_ID};
use crate::config::ConnectionConfig;
use crate::http::body::BodyPoll;
use crate::http::headers::Headers;
use crate::http::origin::{Origin, Scheme};
use crate::http::request::Request;
use crate::http::response::{ResponseSender, StreamingResponse};
use crate::http::session::{
    self, connect_tcp, wait_readable, FdSessionOps, PollEvents, SessionOps, WakeReceiver, Waker,
};
use crate::http::{Error, Result, TransportError, ALPN_H2};
use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Session = Box<dyn SessionOps + Send>;

/// Largest header block accepted across HEADERS + CONTINUATION
const MAX_HEADER_BLOCK: usize = 256 * 1024;

/// Read size per socket wakeup
const READ_CHUNK: usize = 16 * 1024;

/// Headers that describe a single hop and are forbidden in HTTP/2
/// (RFC 7540 Section 8.1.2.2)
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

enum Command {
    Open {
        stream_id: StreamId,
        request: Request,
        response: ResponseSender,
    },
    /// The application consumed `len` bytes of a stream's body
    Release { stream_id: StreamId, len: usize },
    Close,
}

struct Submitter {
    next_stream_id: StreamId,
    commands: Sender<Command>,
}

/// A negotiated HTTP/2 connection
///
/// Shared by every request sent to its [`Origin`]. The transport thread
/// stops once the connection is closed, the peer goes away, or every handle
/// and response has been dropped.
pub struct Connection {
    origin: Origin,
    submitter: Mutex<Submitter>,
    waker: Arc<Waker>,
    open: Arc<AtomicBool>,
}

impl Connection {
    /// Connect to `origin` and negotiate HTTP/2
    ///
    /// Resolves once the peer's SETTINGS have been received. Fails with
    /// [`Error::ProtocolNegotiation`] if the peer does not speak HTTP/2; the
    /// socket is closed in that case.
    pub async fn connect(origin: Origin, config: ConnectionConfig) -> Result<Connection> {
        let (commands, command_rx) = mpsc::channel();
        let (waker, wake_rx) = session::wake_pair()?;
        let waker = Arc::new(waker);
        let open = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver_origin = origin.clone();
        let driver_waker = Arc::clone(&waker);
        let driver_open = Arc::clone(&open);
        thread::Builder::new()
            .name(format!("h2 {}", origin))
            .spawn(move || {
                let driver = Driver::establish(
                    driver_origin,
                    &config,
                    command_rx,
                    wake_rx,
                    driver_waker,
                    driver_open,
                );
                match driver {
                    Ok(driver) => {
                        let _ = ready_tx.send(Ok(()));
                        driver.run();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Connection {
                origin,
                submitter: Mutex::new(Submitter {
                    next_stream_id: 1,
                    commands,
                }),
                waker,
                open,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Transport(TransportError::ConnectionClosed)),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Whether new requests can still be submitted
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Submit a request and start it immediately
    ///
    /// The returned response is fed by the transport thread; its body
    /// window is replenished as chunks are taken out of it.
    pub fn submit(&self, request: Request) -> Result<StreamingResponse> {
        if !self.is_open() {
            return Err(Error::Transport(TransportError::ConnectionClosed));
        }

        // Stream IDs must reach the wire in increasing order, so allocation
        // and enqueueing happen under the same lock.
        let mut submitter = self.submitter.lock().unwrap_or_else(PoisonError::into_inner);
        let stream_id = submitter.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            self.open.store(false, Ordering::Release);
            return Err(Error::Transport(TransportError::Protocol(
                "stream IDs exhausted".to_string(),
            )));
        }
        submitter.next_stream_id += 2;

        let release_tx = submitter.commands.clone();
        let release_waker = Arc::clone(&self.waker);
        let (sender, response) = StreamingResponse::channel_with_release(move |len| {
            if release_tx.send(Command::Release { stream_id, len }).is_ok() {
                release_waker.wake();
            }
        });

        submitter
            .commands
            .send(Command::Open {
                stream_id,
                request,
                response: sender,
            })
            .map_err(|_| Error::Transport(TransportError::ConnectionClosed))?;
        drop(submitter);

        self.waker.wake();
        Ok(response)
    }

    /// Close the connection
    ///
    /// Sends GOAWAY and fails every in-flight response with
    /// [`TransportError::ConnectionClosed`].
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("{}: closing connection", self.origin);
        }
        let submitter = self.submitter.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = submitter.commands.send(Command::Close);
        self.waker.wake();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("origin", &self.origin)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Header block spread over HEADERS and CONTINUATION frames
struct PendingHeaders {
    stream_id: StreamId,
    block: BytesMut,
    end_stream: bool,
}

/// State owned by the transport thread
struct Driver {
    origin: Origin,
    session: Session,
    codec: FrameCodec,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    flow: ConnectionFlowControl,
    streams: StreamManager,
    /// Opened by a handle but waiting for a concurrency slot
    queued: VecDeque<(StreamId, Request, ResponseSender)>,
    continuation: Option<PendingHeaders>,
    /// Peer's GOAWAY, once received
    goaway: Option<GoawayFrame>,
    commands: Receiver<Command>,
    commands_closed: bool,
    close_requested: bool,
    wake: WakeReceiver,
    waker: Arc<Waker>,
    open: Arc<AtomicBool>,
    /// Encoded frames waiting to be written
    out: BytesMut,
    poll_interval: Duration,
    write_timeout: Duration,
}

impl Driver {
    fn establish(
        origin: Origin,
        config: &ConnectionConfig,
        commands: Receiver<Command>,
        wake: WakeReceiver,
        waker: Arc<Waker>,
        open: Arc<AtomicBool>,
    ) -> Result<Self> {
        let timeout = config.connect_timeout();
        let tcp = connect_tcp(origin.host(), origin.port(), timeout)?;

        let session: Session = match origin.scheme() {
            Scheme::Http => Box::new(FdSessionOps::new(tcp)),
            Scheme::Https => {
                // Bound the blocking handshake, then hand the socket to poll()
                tcp.set_read_timeout(Some(timeout))?;
                tcp.set_write_timeout(Some(timeout))?;
                let clone = tcp.try_clone()?;
                let mut tls = config.tls_config()?.connect(tcp, origin.host())?;
                clone.set_read_timeout(None)?;
                clone.set_write_timeout(None)?;

                if tls.alpn_protocol() != Some(ALPN_H2.as_bytes()) {
                    let selected = tls
                        .alpn_protocol()
                        .map(|p| String::from_utf8_lossy(p).into_owned())
                        .unwrap_or_else(|| "no protocol (HTTP/1.1)".to_string());
                    let _ = tls.close();
                    return Err(Error::ProtocolNegotiation(format!(
                        "{} selected {} instead of {}",
                        origin, selected, ALPN_H2
                    )));
                }
                Box::new(tls)
            }
        };

        let local_settings = config.local_settings();
        let mut driver = Driver {
            codec: FrameCodec::new(local_settings.get_max_frame_size()),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            remote_settings: Settings::new(),
            flow: ConnectionFlowControl::new(),
            streams: StreamManager::new(),
            queued: VecDeque::new(),
            continuation: None,
            goaway: None,
            commands_closed: false,
            close_requested: false,
            out: BytesMut::new(),
            poll_interval: config.poll_interval(),
            write_timeout: timeout,
            origin,
            session,
            local_settings,
            commands,
            wake,
            waker,
            open,
        };

        if let Err(e) = driver.handshake(timeout) {
            let _ = driver.session.close();
            return Err(e);
        }
        Ok(driver)
    }

    /// Send the client preface and wait for the peer's SETTINGS
    fn handshake(&mut self, timeout: Duration) -> Result<()> {
        let mut preface = BytesMut::from(CONNECTION_PREFACE);
        preface.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local_settings.clone(),
        )));
        self.session.write_all(&preface, Some(timeout))?;

        let deadline = Instant::now() + timeout;
        let first = loop {
            if self.codec.buffered() >= 5 && self.codec.buffer().starts_with(b"HTTP/") {
                return Err(Error::ProtocolNegotiation(format!(
                    "{} answered with HTTP/1.x",
                    self.origin
                )));
            }
            match self.codec.next_frame() {
                Ok(Some(frame)) => break frame,
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::ProtocolNegotiation(format!(
                        "{} sent an invalid HTTP/2 preface: {}",
                        self.origin, e
                    )))
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.session.poll(PollEvents::Read, Some(remaining))? {
                return Err(Error::Timeout);
            }
            if self.read_some()? == Some(0) {
                return Err(Error::ProtocolNegotiation(format!(
                    "{} closed the connection before sending SETTINGS",
                    self.origin
                )));
            }
        };

        if first.frame_type() != Some(FrameType::Settings)
            || first.stream_id != CONNECTION_STREAM_ID
            || first.flags.is_ack()
        {
            return Err(Error::ProtocolNegotiation(format!(
                "{} opened with frame type 0x{:x} instead of SETTINGS",
                self.origin, first.raw_type
            )));
        }
        let settings = SettingsFrame::decode(&first)?;
        self.on_settings(settings)?;
        self.flush()?;

        debug!("{}: negotiated HTTP/2", self.origin);
        Ok(())
    }

    fn run(mut self) {
        match self.drive() {
            Ok(()) => self.shutdown(TransportError::ConnectionClosed, Some(ErrorCode::NoError)),
            Err(Error::H2(e)) => {
                warn!("{}: connection error: {}", self.origin, e);
                let code = e.code();
                self.shutdown(e.into(), Some(code));
            }
            Err(e) => {
                warn!("{}: transport failed: {}", self.origin, e);
                self.shutdown(into_transport_error(e), None);
            }
        }
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            self.process_commands();
            if self.close_requested {
                return Ok(());
            }
            self.open_queued()?;
            self.flush_bodies();
            self.flush()?;

            let idle = self.streams.is_empty() && self.queued.is_empty();
            if idle && (self.commands_closed || self.goaway.is_some()) {
                return Ok(());
            }

            let ready = wait_readable(&self.session, &self.wake, Some(self.poll_interval))?;
            if ready.woken {
                self.wake.drain();
            }
            if ready.session && self.read_some()? == Some(0) {
                debug!("{}: peer closed the connection", self.origin);
                return Err(Error::Transport(TransportError::ConnectionClosed));
            }
            // Frames may also be left over from the handshake read
            while let Some(frame) = self.codec.next_frame()? {
                self.handle_frame(frame)?;
            }
        }
    }

    /// Read once from the session into the codec
    ///
    /// Returns `None` if the read would block, `Some(0)` at end of stream.
    fn read_some(&mut self) -> Result<Option<usize>> {
        let mut buf = [0u8; READ_CHUNK];
        match self.session.read(&mut buf) {
            Ok(n) => {
                self.codec.feed(&buf[..n]);
                Ok(Some(n))
            }
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let out = self.out.split();
        self.session.write_all(&out, Some(self.write_timeout))
    }

    fn process_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Open {
                    stream_id,
                    request,
                    response,
                }) => self.queued.push_back((stream_id, request, response)),
                Ok(Command::Release { stream_id, len }) => self.release(stream_id, len),
                Ok(Command::Close) => {
                    self.close_requested = true;
                    return;
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.commands_closed = true;
                    return;
                }
            }
        }
    }

    fn open_queued(&mut self) -> Result<()> {
        while self.streams.can_open() {
            let Some((stream_id, request, response)) = self.queued.pop_front() else {
                break;
            };
            if let Some(goaway) = &self.goaway {
                response.on_error(TransportError::GoAway {
                    code: goaway.error_code,
                });
                continue;
            }
            self.open_stream(stream_id, request, response)?;
        }
        Ok(())
    }

    fn open_stream(
        &mut self,
        stream_id: StreamId,
        request: Request,
        response: ResponseSender,
    ) -> Result<()> {
        let (method, path, headers, body) = request.into_parts();
        let end_stream = body.is_none();

        let authority = self.origin.authority();
        let mut fields: Vec<(&[u8], &[u8])> = vec![
            (&b":method"[..], method.as_bytes()),
            (&b":scheme"[..], self.origin.scheme().as_str().as_bytes()),
            (&b":authority"[..], authority.as_bytes()),
            (&b":path"[..], path.as_bytes()),
        ];
        for (name, value) in headers.iter() {
            if !is_connection_specific(name) {
                fields.push((name.as_bytes(), value.as_bytes()));
            }
        }
        let block = Bytes::from(self.encoder.encode(fields));

        let mut stream = H2Stream::new(
            stream_id,
            self.remote_settings.get_initial_window_size(),
            self.local_settings.get_initial_window_size(),
            response,
            body,
        );
        if let Some(body) = stream.body_mut() {
            body.attach(Arc::clone(&self.waker));
        }
        stream.send_headers(end_stream)?;

        self.out.extend_from_slice(&FrameCodec::encode_header_block(
            stream_id,
            block,
            end_stream,
            self.max_send_frame_size(),
        ));
        self.streams.insert(stream)?;
        debug!("{}: stream {} opened: {} {}", self.origin, stream_id, method, path);
        Ok(())
    }

    /// Encode as much pending request body as the windows allow
    fn flush_bodies(&mut self) {
        let max_frame = self.max_send_frame_size();
        let mut closed = Vec::new();

        for stream in self.streams.iter_mut() {
            let stream_id = stream.id();
            while stream.has_outbound() {
                let data = match stream.take_pending() {
                    Some(data) => data,
                    None => match stream.body_mut().map(|body| body.poll_next()) {
                        Some(BodyPoll::Data(data)) => data,
                        Some(BodyPoll::Pending) => break,
                        Some(BodyPoll::Finished) | None => {
                            self.out.extend_from_slice(&FrameCodec::encode_data_frame(
                                &DataFrame::new(stream_id, Bytes::new(), true),
                            ));
                            stream.send_end_stream();
                            trace!("{}: stream {} body finished", self.origin, stream_id);
                            break;
                        }
                    },
                };
                if data.is_empty() {
                    continue;
                }

                let allowed = data
                    .len()
                    .min(max_frame)
                    .min(self.flow.send.available())
                    .min(stream.flow.send.available());
                if allowed == 0 {
                    stream.set_pending(data);
                    break;
                }
                self.flow.send.consume(allowed);
                stream.flow.send.consume(allowed);

                let mut data = data;
                let chunk = data.split_to(allowed);
                self.out.extend_from_slice(&FrameCodec::encode_data_frame(&DataFrame::new(
                    stream_id, chunk, false,
                )));
                stream.set_pending(data);
            }
            if stream.state().is_closed() {
                closed.push(stream_id);
            }
        }

        for stream_id in closed {
            self.streams.remove_stream(stream_id);
        }
    }

    fn release(&mut self, stream_id: StreamId, len: usize) {
        let Some(stream) = self.streams.get_stream_mut(stream_id) else {
            return;
        };
        // Once the peer has finished sending the window no longer matters
        if !stream.state().can_receive() {
            return;
        }
        if let Some(increment) = stream.flow.recv.release(len) {
            trace!("{}: stream {} WINDOW_UPDATE +{}", self.origin, stream_id, increment);
            self.out.extend_from_slice(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(stream_id, increment),
            ));
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if let Some(pending) = &self.continuation {
            if frame.frame_type() != Some(FrameType::Continuation)
                || frame.stream_id != pending.stream_id
            {
                return Err(H2Error::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    pending.stream_id
                ))
                .into());
            }
        }

        match frame.frame_type() {
            Some(FrameType::Data) => self.on_data(DataFrame::decode(frame)?),
            Some(FrameType::Headers) => {
                let headers = HeadersFrame::decode(frame)?;
                if headers.end_headers {
                    self.on_header_block(headers.stream_id, &headers.header_block, headers.end_stream)
                } else {
                    self.continuation = Some(PendingHeaders {
                        stream_id: headers.stream_id,
                        block: BytesMut::from(&headers.header_block[..]),
                        end_stream: headers.end_stream,
                    });
                    Ok(())
                }
            }
            Some(FrameType::Continuation) => {
                let Some(mut pending) = self.continuation.take() else {
                    return Err(H2Error::Protocol("CONTINUATION without HEADERS".to_string()).into());
                };
                pending.block.extend_from_slice(&frame.payload);
                if pending.block.len() > MAX_HEADER_BLOCK {
                    return Err(H2Error::Protocol(format!(
                        "header block on stream {} exceeds {} bytes",
                        pending.stream_id, MAX_HEADER_BLOCK
                    ))
                    .into());
                }
                if frame.flags.is_end_headers() {
                    self.on_header_block(pending.stream_id, &pending.block, pending.end_stream)
                } else {
                    self.continuation = Some(pending);
                    Ok(())
                }
            }
            Some(FrameType::RstStream) => self.on_rst_stream(RstStreamFrame::decode(&frame)?),
            Some(FrameType::Settings) => self.on_settings(SettingsFrame::decode(&frame)?),
            Some(FrameType::Ping) => {
                if frame.stream_id != CONNECTION_STREAM_ID {
                    return Err(H2Error::Protocol("PING on a stream".to_string()).into());
                }
                let ping = PingFrame::decode(&frame)?;
                if !ping.ack {
                    self.out
                        .extend_from_slice(&FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)));
                }
                Ok(())
            }
            Some(FrameType::Goaway) => {
                self.on_goaway(GoawayFrame::decode(&frame)?);
                Ok(())
            }
            Some(FrameType::WindowUpdate) => self.on_window_update(WindowUpdateFrame::decode(&frame)?),
            Some(FrameType::PushPromise) => {
                Err(H2Error::Protocol("PUSH_PROMISE received with push disabled".to_string()).into())
            }
            Some(FrameType::Priority) | None => {
                trace!("{}: ignoring frame type 0x{:x}", self.origin, frame.raw_type);
                Ok(())
            }
        }
    }

    fn on_data(&mut self, frame: DataFrame) -> Result<()> {
        // The connection window is replenished as soon as data is read
        self.flow.recv.receive(frame.flow_len)?;
        if let Some(increment) = self.flow.recv.release(frame.flow_len) {
            trace!("{}: connection WINDOW_UPDATE +{}", self.origin, increment);
            self.out.extend_from_slice(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment),
            ));
        }

        let stream_id = frame.stream_id;
        let Some(stream) = self.streams.get_stream_mut(stream_id) else {
            trace!("{}: DATA for finished stream {}", self.origin, stream_id);
            return Ok(());
        };

        if let Err(e) = stream.recv_data(frame.flow_len, frame.end_stream) {
            self.reset_stream(stream_id, e.code(), TransportError::Protocol(e.to_string()));
            return Ok(());
        }

        // Padding is returned at once; data comes back as it is consumed
        let padding = frame.flow_len - frame.data.len();
        if padding > 0 {
            if let Some(increment) = stream.flow.recv.release(padding) {
                self.out.extend_from_slice(&FrameCodec::encode_window_update_frame(
                    &WindowUpdateFrame::new(stream_id, increment),
                ));
            }
        }

        stream.response().on_body(frame.data);
        if frame.end_stream {
            stream.response().on_complete();
            debug!("{}: stream {} response complete", self.origin, stream_id);
        }
        if stream.state().is_closed() {
            self.streams.remove_stream(stream_id);
        }
        Ok(())
    }

    fn on_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool) -> Result<()> {
        // Every block goes through the decoder to keep its table in sync
        let fields = self
            .decoder
            .decode(block)
            .map_err(|e| H2Error::Compression(format!("{:?}", e)))?;

        let Some(stream) = self.streams.get_stream_mut(stream_id) else {
            trace!("{}: HEADERS for finished stream {}", self.origin, stream_id);
            return Ok(());
        };
        if let Err(e) = stream.recv_headers(end_stream) {
            self.reset_stream(stream_id, e.code(), TransportError::Protocol(e.to_string()));
            return Ok(());
        }

        if stream.head_received() {
            trace!("{}: ignoring trailers on stream {}", self.origin, stream_id);
        } else {
            match parse_response_head(fields) {
                Ok((status, _)) if (100..200).contains(&status) => {
                    trace!("{}: stream {} informational {}", self.origin, stream_id, status);
                }
                Ok((status, headers)) => {
                    debug!("{}: stream {} response {}", self.origin, stream_id, status);
                    stream.set_head_received();
                    stream.response().on_headers(status, headers);
                }
                Err(msg) => {
                    self.reset_stream(stream_id, ErrorCode::ProtocolError, TransportError::Protocol(msg));
                    return Ok(());
                }
            }
        }

        if end_stream {
            stream.response().on_complete();
            debug!("{}: stream {} response complete", self.origin, stream_id);
        }
        if stream.state().is_closed() {
            self.streams.remove_stream(stream_id);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) -> Result<()> {
        if frame.stream_id == CONNECTION_STREAM_ID {
            return Err(H2Error::Protocol("RST_STREAM on stream 0".to_string()).into());
        }
        if let Some(stream) = self.streams.remove_stream(frame.stream_id) {
            debug!(
                "{}: stream {} reset by peer: {}",
                self.origin, frame.stream_id, frame.error_code
            );
            stream.fail(TransportError::StreamReset {
                stream_id: frame.stream_id,
                code: frame.error_code,
            });
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.ack {
            trace!("{}: SETTINGS acknowledged", self.origin);
            return Ok(());
        }

        let settings = frame.settings;
        debug!("{}: peer SETTINGS {:?}", self.origin, settings);
        if let Some(size) = settings.initial_window_size {
            for stream in self.streams.iter_mut() {
                stream.flow.send.update_initial_size(size)?;
            }
        }
        if settings.max_concurrent_streams.is_some() {
            self.streams
                .set_max_concurrent_streams(settings.max_concurrent_streams);
        }
        self.remote_settings.merge(&settings);

        self.out
            .extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        Ok(())
    }

    fn on_goaway(&mut self, frame: GoawayFrame) {
        debug!(
            "{}: GOAWAY last_stream_id={} code={} {}",
            self.origin,
            frame.last_stream_id,
            frame.error_code,
            String::from_utf8_lossy(&frame.debug_data)
        );
        self.open.store(false, Ordering::Release);

        // Streams the peer never processed will not be answered
        for stream in self.streams.split_off_above(frame.last_stream_id) {
            stream.fail(TransportError::GoAway {
                code: frame.error_code,
            });
        }
        self.goaway = Some(frame);
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        if frame.stream_id == CONNECTION_STREAM_ID {
            self.flow.send.increase(frame.size_increment)?;
            return Ok(());
        }
        let Some(stream) = self.streams.get_stream_mut(frame.stream_id) else {
            return Ok(());
        };
        if let Err(e) = stream.flow.send.increase(frame.size_increment) {
            self.reset_stream(frame.stream_id, e.code(), TransportError::Protocol(e.to_string()));
        }
        Ok(())
    }

    /// Abort one stream with RST_STREAM and fail its response
    fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode, err: TransportError) {
        debug!("{}: resetting stream {}: {}", self.origin, stream_id, err);
        self.out
            .extend_from_slice(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
                stream_id,
                error_code: code,
            }));
        if let Some(stream) = self.streams.remove_stream(stream_id) {
            stream.fail(err);
        }
    }

    fn max_send_frame_size(&self) -> usize {
        self.remote_settings.get_max_frame_size() as usize
    }

    /// Fail everything still outstanding and close the session
    fn shutdown(mut self, err: TransportError, goaway: Option<ErrorCode>) {
        self.open.store(false, Ordering::Release);

        if let Some(code) = goaway {
            self.out.extend_from_slice(&FrameCodec::encode_goaway_frame(&GoawayFrame::new(
                0,
                code,
                Bytes::new(),
            )));
            let _ = self.flush();
        }

        for stream in self.streams.drain() {
            stream.fail(err.clone());
        }
        for (_, _, response) in self.queued.drain(..) {
            response.on_error(err.clone());
        }
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Open { response, .. } = command {
                response.on_error(err.clone());
            }
        }

        let _ = self.session.close();
        debug!("{}: connection closed ({})", self.origin, err);
    }
}

fn is_connection_specific(name: &str) -> bool {
    CONNECTION_SPECIFIC_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Split a decoded response header block into status and regular headers
fn parse_response_head(
    fields: Vec<(Vec<u8>, Vec<u8>)>,
) -> std::result::Result<(u16, Headers), String> {
    let mut status = None;
    let mut headers = Headers::new();

    for (name, value) in fields {
        let name =
            String::from_utf8(name).map_err(|_| "header name is not UTF-8".to_string())?;
        let value = String::from_utf8_lossy(&value).into_owned();
        if name == ":status" {
            let code = value
                .parse::<u16>()
                .ok()
                .filter(|code| (100..1000).contains(code))
                .ok_or_else(|| format!("invalid :status {:?}", value))?;
            status = Some(code);
        } else if name.starts_with(':') {
            return Err(format!("unexpected pseudo-header {}", name));
        } else {
            headers.insert(name, value);
        }
    }

    status
        .map(|status| (status, headers))
        .ok_or_else(|| "response without :status".to_string())
}

fn into_transport_error(err: Error) -> TransportError {
    match err {
        Error::Transport(e) => e,
        Error::H2(e) => e.into(),
        Error::Io(e) => TransportError::Io(e.to_string()),
        Error::Timeout => TransportError::Io("write timed out".to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}
