//! Domain types with no socket or runtime dependencies.
//!
//! The only entity here is the [`Connection`] state machine.  It owns a
//! generic `std::io::Write` sink instead of a concrete socket, so tests drive
//! it with an in-memory buffer and the server drives it with a channel-backed
//! writer.

pub mod connection;

pub use connection::{
    CloseReason, Connection, ConnectionError, ConnectionEvent, ConnectionState, Limits,
};
