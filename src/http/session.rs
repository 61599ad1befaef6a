//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS connections.
//!
//! The connection driver only ever talks to a `Box<dyn SessionOps + Send>`,
//! so the HTTP/2 code is identical for `http` and `https` origins.

use super::{Error, Result};
use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered writes
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the session
    fn close(&mut self) -> Result<()>;

    /// Descriptor to poll for readiness
    fn raw_fd(&self) -> RawFd;

    /// Whether decrypted data is already buffered above the socket
    fn has_buffered(&self) -> bool {
        false
    }

    /// Write the whole buffer, waiting for the socket as needed
    ///
    /// `timeout` bounds the whole write, not each wait.
    fn write_all(&mut self, mut buf: &[u8], timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        while !buf.is_empty() {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining.is_some_and(|r| r.is_zero()) || !self.poll(PollEvents::Write, remaining)? {
                return Err(Error::Timeout);
            }
            match self.write(buf) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "session closed while writing",
                    )))
                }
                Ok(n) => buf = &buf[n..],
                Err(Error::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        self.flush()
    }
}

impl<S: SessionOps + ?Sized> SessionOps for Box<S> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        (**self).poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn raw_fd(&self) -> RawFd {
        (**self).raw_fd()
    }

    fn has_buffered(&self) -> bool {
        (**self).has_buffered()
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Poll one descriptor with libc
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms(timeout)) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::Io(err));
    }

    Ok(result > 0)
}

fn timeout_ms(timeout: Option<Duration>) -> i32 {
    timeout
        .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
        .unwrap_or(-1) // -1 = infinite
}

/// Readiness reported by [`wait_readable`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub session: bool,
    pub woken: bool,
}

/// Wait until the session has data to read or the driver is woken
pub fn wait_readable<S: SessionOps + ?Sized>(
    session: &S,
    wake: &WakeReceiver,
    timeout: Option<Duration>,
) -> Result<Readiness> {
    use libc::{poll, pollfd, POLLERR, POLLHUP, POLLIN};

    if session.has_buffered() {
        return Ok(Readiness {
            session: true,
            woken: false,
        });
    }

    let mut fds = [
        pollfd {
            fd: session.raw_fd(),
            events: POLLIN,
            revents: 0,
        },
        pollfd {
            fd: wake.raw_fd(),
            events: POLLIN,
            revents: 0,
        },
    ];

    let result = unsafe { poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms(timeout)) };

    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::default());
        }
        return Err(Error::Io(err));
    }

    let ready = POLLIN | POLLHUP | POLLERR;
    Ok(Readiness {
        session: fds[0].revents & ready != 0,
        woken: fds[1].revents & ready != 0,
    })
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both).map_err(Error::from)
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Open a TCP connection, trying each resolved address in turn
///
/// Nagle is disabled because the transport writes many small frames.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;

    for addr in (host, port).to_socket_addrs()? {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        match socket.connect_timeout(&SockAddr::from(addr), remaining) {
            Ok(()) => {
                socket.set_nodelay(true)?;
                socket.set_keepalive(true)?;
                debug!("connected to {} ({})", addr, host);
                return Ok(socket.into());
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => last_err = Some(Error::Timeout),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(Error::Io(e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        ))
    }))
}

/// Wakes a connection driver blocked in [`wait_readable`]
#[derive(Debug)]
pub struct Waker {
    tx: UnixStream,
}

/// Receiving end of a [`Waker`]
#[derive(Debug)]
pub struct WakeReceiver {
    rx: UnixStream,
}

/// Create a connected waker pair
pub fn wake_pair() -> io::Result<(Waker, WakeReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((Waker { tx }, WakeReceiver { rx }))
}

impl Waker {
    pub fn wake(&self) {
        // A full pipe already guarantees a pending wakeup
        let _ = (&self.tx).write(&[1]);
    }
}

impl WakeReceiver {
    pub fn raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    /// Consume pending wakeups
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.rx).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = connect_tcp("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap();
        let mut session = FdSessionOps::new(stream);

        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());

        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_poll_times_out_without_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let session = FdSessionOps::new(stream);
        assert!(!session
            .poll(PollEvents::Read, Some(Duration::from_millis(50)))
            .unwrap());
    }

    #[test]
    fn test_waker_interrupts_wait() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
        });

        let session: Box<dyn SessionOps + Send> =
            Box::new(FdSessionOps::new(TcpStream::connect(addr).unwrap()));
        let (waker, receiver) = wake_pair().unwrap();

        waker.wake();
        waker.wake();
        let ready = wait_readable(&session, &receiver, Some(Duration::from_secs(5))).unwrap();
        assert!(ready.woken);
        assert!(!ready.session);

        receiver.drain();
        let ready = wait_readable(&session, &receiver, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(ready, Readiness::default());
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_tcp("127.0.0.1", port, Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
