//! Explicit registry of live connections, grouped by stream.
//!
//! Connections are never tracked through global state.  Each one registers
//! the sending half of its outbound queue here when its handshake succeeds
//! and unregisters when its session task ends, so the registry only ever
//! holds connections that can still be written to.
//!
//! Outbound queues are bounded.  A queue that is full when a command
//! arrives belongs to a session that has stopped keeping up; fan-out
//! reports it as slow and the relay evicts it.  Eviction drops the
//! registry's sender, so the session drains what it already holds, sees
//! its queue close, and shuts the connection down.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::StreamId;

/// Identifies one WebSocket connection for its whole lifetime.
pub type ConnectionId = Uuid;

/// Commands delivered to a connection's session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send this text as one frame.
    Text(String),
    /// Close the connection from the server side.
    Close,
}

/// Commands a session may have pending before it counts as slow.
pub const OUTBOX_CAPACITY: usize = 128;

/// Queue feeding a connection's session task.
pub type Outbox = mpsc::Sender<Outbound>;

/// Creates a session's outbound queue with [`OUTBOX_CAPACITY`] slots.
pub fn outbox() -> (Outbox, mpsc::Receiver<Outbound>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// Registry shared by the accept loop and every session task.
pub type SharedRegistry = Arc<RwLock<StreamRegistry>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Result of queueing one command for several connections.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Fanout {
    /// Queues that accepted the command.
    pub delivered: usize,
    /// Connections whose queue was full; they missed the command.
    pub slow: Vec<(StreamId, ConnectionId)>,
}

impl Fanout {
    fn offer(
        &mut self,
        stream: &StreamId,
        id: ConnectionId,
        outbox: &Outbox,
        command: Outbound,
    ) {
        match outbox.try_send(command) {
            Ok(()) => self.delivered += 1,
            Err(TrySendError::Full(_)) => self.slow.push((stream.clone(), id)),
            // The session already ended and unregisters on its way out.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Live connections, keyed by stream then by connection id.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<StreamId, HashMap<ConnectionId, Outbox>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh registry for sharing across tasks.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Adds `id` to `stream`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyRegistered`] if `id` is present on any stream.
    pub fn register(
        &mut self,
        stream: StreamId,
        id: ConnectionId,
        outbox: Outbox,
    ) -> Result<(), RegistryError> {
        if self.streams.values().any(|conns| conns.contains_key(&id)) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        info!("connection {id} joined stream {stream}");
        self.streams.entry(stream).or_default().insert(id, outbox);
        Ok(())
    }

    /// Removes `id` from `stream`, dropping the stream once it is empty.
    ///
    /// Returns `false` if the connection was not registered.
    pub fn unregister(&mut self, stream: &StreamId, id: ConnectionId) -> bool {
        let Some(conns) = self.streams.get_mut(stream) else {
            return false;
        };
        let removed = conns.remove(&id).is_some();
        if conns.is_empty() {
            self.streams.remove(stream);
            debug!("stream {stream} has no connections left");
        }
        if removed {
            info!("connection {id} left stream {stream}");
        }
        removed
    }

    /// Queues `command` for every connection on `stream` without waiting.
    ///
    /// A queue whose session has already ended is skipped.  A full queue is
    /// reported in [`Fanout::slow`] and left registered; call [`evict`]
    /// to drop it.
    ///
    /// [`evict`]: Self::evict
    pub fn send_to_stream(&self, stream: &StreamId, command: &Outbound) -> Fanout {
        let mut fanout = Fanout::default();
        if let Some(conns) = self.streams.get(stream) {
            for (id, outbox) in conns {
                fanout.offer(stream, *id, outbox, command.clone());
            }
        }
        fanout
    }

    /// Queues [`Outbound::Close`] for every connection on every stream.
    pub fn close_all(&self) -> Fanout {
        let mut fanout = Fanout::default();
        for (stream, conns) in &self.streams {
            for (id, outbox) in conns {
                fanout.offer(stream, *id, outbox, Outbound::Close);
            }
        }
        fanout
    }

    /// Drops every listed connection's queue.  Returns how many were removed.
    pub fn evict(&mut self, slow: &[(StreamId, ConnectionId)]) -> usize {
        let mut evicted = 0;
        for (stream, id) in slow {
            if self.unregister(stream, *id) {
                warn!("connection {id} on stream {stream} is not keeping up; evicted");
                evicted += 1;
            }
        }
        evicted
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn connection_count(&self) -> usize {
        self.streams.values().map(HashMap::len).sum()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> StreamId {
        StreamId::parse(name).unwrap()
    }

    #[test]
    fn test_register_and_counts() {
        // Arrange
        let mut reg = StreamRegistry::new();
        let (tx, _rx) = outbox();

        // Act
        reg.register(stream("a"), Uuid::new_v4(), tx.clone()).unwrap();
        reg.register(stream("a"), Uuid::new_v4(), tx.clone()).unwrap();
        reg.register(stream("b"), Uuid::new_v4(), tx).unwrap();

        // Assert
        assert_eq!(reg.stream_count(), 2);
        assert_eq!(reg.connection_count(), 3);
    }

    #[test]
    fn test_register_duplicate_id_is_rejected() {
        let mut reg = StreamRegistry::new();
        let (tx, _rx) = outbox();
        let id = Uuid::new_v4();

        reg.register(stream("a"), id, tx.clone()).unwrap();
        let err = reg.register(stream("b"), id, tx).unwrap_err();

        assert_eq!(err, RegistryError::AlreadyRegistered(id));
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn test_unregister_removes_empty_stream() {
        let mut reg = StreamRegistry::new();
        let (tx, _rx) = outbox();
        let id = Uuid::new_v4();
        reg.register(stream("a"), id, tx).unwrap();

        assert!(reg.unregister(&stream("a"), id));
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(reg.stream_count(), 0);
    }

    #[test]
    fn test_unregister_unknown_returns_false() {
        let mut reg = StreamRegistry::new();
        assert!(!reg.unregister(&stream("nope"), Uuid::new_v4()));
    }

    #[test]
    fn test_send_to_stream_reaches_only_that_stream() {
        // Arrange
        let mut reg = StreamRegistry::new();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();
        reg.register(stream("a"), Uuid::new_v4(), tx_a).unwrap();
        reg.register(stream("b"), Uuid::new_v4(), tx_b).unwrap();

        // Act
        let fanout = reg.send_to_stream(&stream("a"), &Outbound::Text("hi".into()));

        // Assert
        assert_eq!(fanout.delivered, 1);
        assert!(fanout.slow.is_empty());
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Text("hi".into()));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_send_to_stream_skips_dropped_queue() {
        let mut reg = StreamRegistry::new();
        let (tx_live, _rx_live) = outbox();
        let (tx_dead, rx_dead) = outbox();
        reg.register(stream("a"), Uuid::new_v4(), tx_live).unwrap();
        reg.register(stream("a"), Uuid::new_v4(), tx_dead).unwrap();
        drop(rx_dead);

        let fanout = reg.send_to_stream(&stream("a"), &Outbound::Close);

        assert_eq!(fanout.delivered, 1);
        assert!(fanout.slow.is_empty());
    }

    #[test]
    fn test_send_to_stream_reports_full_queue_as_slow() {
        // Arrange: one slot, and nobody reading it.
        let mut reg = StreamRegistry::new();
        let (tx_slow, mut rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = outbox();
        let slow = Uuid::new_v4();
        reg.register(stream("a"), slow, tx_slow).unwrap();
        reg.register(stream("a"), Uuid::new_v4(), tx_fast).unwrap();

        // Act
        let first = reg.send_to_stream(&stream("a"), &Outbound::Text("1".into()));
        let second = reg.send_to_stream(&stream("a"), &Outbound::Text("2".into()));

        // Assert
        assert_eq!(first.delivered, 2);
        assert_eq!(second.delivered, 1);
        assert_eq!(second.slow, vec![(stream("a"), slow)]);
        assert_eq!(rx_fast.try_recv().unwrap(), Outbound::Text("1".into()));
        assert_eq!(rx_fast.try_recv().unwrap(), Outbound::Text("2".into()));
        assert_eq!(rx_slow.try_recv().unwrap(), Outbound::Text("1".into()));
        assert!(rx_slow.try_recv().is_err());
    }

    #[test]
    fn test_evict_closes_slow_queue_after_pending_commands() {
        // Arrange
        let mut reg = StreamRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let id = Uuid::new_v4();
        reg.register(stream("a"), id, tx).unwrap();
        reg.send_to_stream(&stream("a"), &Outbound::Text("kept".into()));
        let fanout = reg.send_to_stream(&stream("a"), &Outbound::Text("lost".into()));

        // Act
        let evicted = reg.evict(&fanout.slow);

        // Assert
        assert_eq!(evicted, 1);
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("kept".into()));
        assert_eq!(
            rx.try_recv().unwrap_err(),
            mpsc::error::TryRecvError::Disconnected
        );
    }

    #[test]
    fn test_evict_ignores_connections_already_gone() {
        let mut reg = StreamRegistry::new();
        assert_eq!(reg.evict(&[(stream("a"), Uuid::new_v4())]), 0);
    }

    #[test]
    fn test_close_all_reaches_every_stream() {
        let mut reg = StreamRegistry::new();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();
        reg.register(stream("a"), Uuid::new_v4(), tx_a).unwrap();
        reg.register(stream("b"), Uuid::new_v4(), tx_b).unwrap();

        assert_eq!(reg.close_all().delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Close);
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Close);
    }
}
