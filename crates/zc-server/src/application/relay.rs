//! Use case: relay text between the connections of one stream.
//!
//! Every text message a client sends is fanned out to all connections on
//! the same stream, the sender included.  A single client therefore sees
//! its own messages echoed back, which is how the editor's terminal view
//! confirms input was received.
//!
//! Fan-out never waits on a slow session.  A connection whose queue is full
//! misses the message and is evicted from the registry, which closes it.

use serde::Serialize;
use tracing::debug;

use super::registry::{ConnectionId, Fanout, Outbound, Outbox, RegistryError, SharedRegistry};
use crate::domain::StreamId;

/// Body of the `/health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub streams: usize,
    pub connections: usize,
}

/// Routes messages between sessions through the shared registry.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    registry: SharedRegistry,
}

impl StreamRelay {
    pub fn new(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    /// Registers a freshly opened connection.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryError`] if the id is already in use.
    pub async fn join(
        &self,
        stream: &StreamId,
        id: ConnectionId,
        outbox: Outbox,
    ) -> Result<(), RegistryError> {
        self.registry
            .write()
            .await
            .register(stream.clone(), id, outbox)
    }

    /// Removes a connection whose session has ended.
    pub async fn leave(&self, stream: &StreamId, id: ConnectionId) {
        if !self.registry.write().await.unregister(stream, id) {
            debug!("connection {id} was already evicted from stream {stream}");
        }
    }

    /// Fans `text` out to every connection on `stream`.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn publish(&self, stream: &StreamId, from: ConnectionId, text: &str) -> usize {
        let fanout = self
            .registry
            .read()
            .await
            .send_to_stream(stream, &Outbound::Text(text.to_string()));
        debug!(
            "relayed {} bytes from {from} to {} connection(s) on {stream}",
            text.len(),
            fanout.delivered
        );
        self.finish_fanout(fanout).await
    }

    /// Asks every open connection to close; used at shutdown.
    ///
    /// Returns the number of connections asked.  Any whose queue is full are
    /// evicted instead, which closes them just the same.
    pub async fn close_all(&self) -> usize {
        let fanout = self.registry.read().await.close_all();
        let slow = fanout.slow.len();
        self.finish_fanout(fanout).await + slow
    }

    /// Evicts the connections a fan-out found slow; returns how many got it.
    async fn finish_fanout(&self, fanout: Fanout) -> usize {
        if !fanout.slow.is_empty() {
            self.registry.write().await.evict(&fanout.slow);
        }
        fanout.delivered
    }

    pub async fn health(&self) -> HealthReport {
        let reg = self.registry.read().await;
        HealthReport {
            status: "ok",
            streams: reg.stream_count(),
            connections: reg.connection_count(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
