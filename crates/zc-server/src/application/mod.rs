//! Application layer: use cases that sit between the sockets and the domain.
//!
//! - [`registry`]: which connections are open, per stream.
//! - [`relay`]: fan-out of text messages and the health snapshot.

pub mod registry;
pub mod relay;

pub use registry::{
    outbox, ConnectionId, Fanout, Outbound, Outbox, RegistryError, SharedRegistry, StreamRegistry,
    OUTBOX_CAPACITY,
};
pub use relay::{HealthReport, StreamRelay};
