//! Per-origin connection reuse
//!
//! A [`ConnectionManager`] hands out one shared HTTP/2 [`Connection`] per
//! [`Origin`]. Creation is single-flight: concurrent callers for the same
//! origin wait on the same negotiation instead of racing their own, and all
//! of them see its outcome, success or failure. Failed negotiations are
//! never cached, and connections found closed on lookup are replaced.

use super::h2::Connection;
use super::origin::Origin;
use super::tls::TlsError;
use super::{Error, Result, TransportError};
use crate::config::ConnectionConfig;
use log::debug;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use url::Url;

/// Outcome of the one connection attempt made for a slot
type Slot = Arc<OnceCell<Result<Arc<Connection>>>>;

/// Cache of negotiated connections keyed by origin
///
/// Scoped to its owner; independent managers never share connections.
pub struct ConnectionManager {
    config: ConnectionConfig,
    slots: Mutex<HashMap<Origin, Slot>>,
    created: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        ConnectionManager {
            config,
            slots: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Return the connection for `origin`, connecting if needed
    ///
    /// Fails with [`Error::ProtocolNegotiation`] when the peer does not
    /// negotiate HTTP/2; nothing is cached then, and every caller that was
    /// waiting on that attempt gets the same error.
    pub async fn get_connection(&self, origin: &Origin) -> Result<Arc<Connection>> {
        let slot = self.slot(origin);

        let outcome = slot
            .get_or_init(|| async {
                let count = self.created.fetch_add(1, Ordering::AcqRel) + 1;
                debug!("{}: creating connection #{}", origin, count);
                let result = Connection::connect(origin.clone(), self.config.clone()).await;
                if let Err(e) = &result {
                    debug!("{}: connection failed: {}", origin, e);
                    self.evict(origin, &slot);
                }
                result.map(Arc::new)
            })
            .await;

        match outcome {
            Ok(connection) => Ok(Arc::clone(connection)),
            Err(e) => Err(replay(e)),
        }
    }

    /// Resolve the origin of `url` and return its connection
    pub async fn get_connection_for_url(&self, url: &Url) -> Result<Arc<Connection>> {
        let origin = Origin::from_url(url)?;
        self.get_connection(&origin).await
    }

    /// Fetch the slot for `origin`, replacing one whose connection has closed
    fn slot(&self, origin: &Origin) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(origin) {
            match slot.get() {
                Some(Ok(connection)) if !connection.is_open() => {
                    debug!("{}: evicting closed connection", origin);
                }
                Some(Err(_)) => {}
                _ => {
                    debug!("{}: reusing connection", origin);
                    return Arc::clone(slot);
                }
            }
        }
        let slot = Slot::default();
        slots.insert(origin.clone(), Arc::clone(&slot));
        slot
    }

    /// Remove `slot` unless another caller already replaced it
    fn evict(&self, origin: &Origin, slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(origin).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(origin);
        }
    }

    /// Number of connections this manager has attempted to create
    pub fn connections_created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Number of cached origins
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every cached connection and clear the cache
    pub fn close_all(&self) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        for slot in slots {
            if let Some(Ok(connection)) = slot.get() {
                connection.close();
            }
        }
    }
}

/// Copy of a failed attempt's error for one of the callers that shared it
///
/// Errors wrapping a foreign source keep its kind and message.
fn replay(err: &Error) -> Error {
    match err {
        Error::InvalidOrigin(msg) => Error::InvalidOrigin(msg.clone()),
        Error::ProtocolNegotiation(msg) => Error::ProtocolNegotiation(msg.clone()),
        Error::StreamClosed => Error::StreamClosed,
        Error::Transport(e) => Error::Transport(e.clone()),
        Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
        Error::Tls(e) => Error::Tls(TlsError::HandshakeFailed(e.to_string())),
        Error::H2(e) => Error::Transport(TransportError::Protocol(e.to_string())),
        Error::Url(e) => Error::Url(*e),
        Error::Timeout => Error::Timeout,
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}
