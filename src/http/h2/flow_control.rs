//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! Send windows gate outbound DATA: the connection driver only writes what
//! both the connection and the stream window allow, and keeps the rest until
//! a WINDOW_UPDATE arrives.
//!
//! Receive windows are replenished by *releasing* capacity. The connection
//! window is released as soon as a DATA frame is read; a stream window is
//! released only when the application takes the chunk out of its
//! [`StreamingResponse`](crate::http::StreamingResponse), so a slow consumer
//! stops the peer once one window of unread data is buffered.

use super::error::{Error, Result};
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Largest legal window (2^31 - 1)
const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Flow control window
///
/// Tracks how many bytes may still be sent (or received) before the window
/// has to be reopened by a WINDOW_UPDATE.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Size announced in SETTINGS_INITIAL_WINDOW_SIZE
    initial_size: u32,
    /// Can go negative after a SETTINGS_INITIAL_WINDOW_SIZE decrease
    current_size: i64,
}

impl FlowControlWindow {
    /// Window of the default 65535 bytes
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Window starting at `initial_size` bytes
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Current window size, negative when over-committed
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Take up to `amount` bytes of capacity, returning what was granted
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.current_size -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment
    ///
    /// Returns the new window size. A zero increment is a protocol error and
    /// growing past 2^31-1 a flow-control error.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "Window update increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Shrink the window by `amount` bytes of received data
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Shift the window by the change in SETTINGS_INITIAL_WINDOW_SIZE
    ///
    /// Bytes already in flight stay counted, so the result may be negative.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive window with deferred replenishment
///
/// Inbound DATA shrinks the window right away; capacity only comes back
/// through [`RecvWindow::release`].
#[derive(Debug, Clone)]
pub struct RecvWindow {
    window: FlowControlWindow,
    /// Released bytes not yet announced in a WINDOW_UPDATE
    unannounced: u32,
}

impl RecvWindow {
    /// Receive window of `initial_size` bytes
    pub fn with_initial_size(initial_size: u32) -> Self {
        RecvWindow {
            window: FlowControlWindow::with_initial_size(initial_size),
            unannounced: 0,
        }
    }

    /// Bytes the peer may still send
    pub fn size(&self) -> i64 {
        self.window.size()
    }

    /// Account for an inbound DATA frame
    ///
    /// A peer that overruns the window is a flow-control error.
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.window.size() {
            return Err(Error::FlowControl(format!(
                "Peer sent {} bytes into a window of {}",
                amount,
                self.window.size()
            )));
        }
        self.window.decrease(amount);
        Ok(())
    }

    /// Give back capacity the application has finished with
    ///
    /// Returns the WINDOW_UPDATE increment to send once at least half of the
    /// initial window has been released, batching small releases.
    pub fn release(&mut self, amount: usize) -> Option<u32> {
        self.unannounced = self.unannounced.saturating_add(amount as u32);
        if self.unannounced == 0 || self.unannounced < self.window.initial_size() / 2 {
            return None;
        }
        let increment = std::mem::take(&mut self.unannounced);
        // Releasing never exceeds what was received, so this cannot overflow
        let _ = self.window.increase(increment);
        Some(increment)
    }
}

/// Connection-level flow control
///
/// Shared by every stream on the connection.
#[derive(Debug)]
pub struct ConnectionFlowControl {
    /// Send window (outbound DATA)
    pub send: FlowControlWindow,
    /// Receive window (inbound DATA)
    pub recv: RecvWindow,
}

impl ConnectionFlowControl {
    /// The connection window always starts at 65535 regardless of SETTINGS
    pub fn new() -> Self {
        ConnectionFlowControl {
            send: FlowControlWindow::new(),
            recv: RecvWindow::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE),
        }
    }
}

impl Default for ConnectionFlowControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream-level flow control
///
/// Both windows start from SETTINGS_INITIAL_WINDOW_SIZE: ours for `recv`,
/// the peer's for `send`.
#[derive(Debug)]
pub struct StreamFlowControl {
    /// Send window (outbound DATA)
    pub send: FlowControlWindow,
    /// Receive window (inbound DATA)
    pub recv: RecvWindow,
}

impl StreamFlowControl {
    /// Create with the given send and receive window sizes
    pub fn with_initial_sizes(send_size: u32, recv_size: u32) -> Self {
        StreamFlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: RecvWindow::with_initial_size(recv_size),
        }
    }
}
