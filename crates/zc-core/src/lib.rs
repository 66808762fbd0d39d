//! # zc-core
//!
//! The WebSocket frame engine behind the zero-code editor's terminal and
//! streaming channels.  It implements the subset of RFC 6455 a browser needs
//! for text messaging over a raw TCP socket:
//!
//! - **`protocol::handshake`** – parse the HTTP Upgrade request and compute
//!   `Sec-WebSocket-Accept`.
//! - **`protocol::frame`** – decode masked client frames (7/16/64-bit
//!   lengths) and encode unmasked server frames.
//! - **`protocol::event`** – classify each decoded frame as text, close or
//!   unsupported.
//! - **`domain::connection`** – the `Connecting → Open → Closed` state
//!   machine that ties the pieces together for one socket.
//!
//! The crate does no I/O of its own and never blocks: its owner reads bytes
//! from the socket, hands them to [`Connection::receive`], and acts on the
//! returned events.

pub mod domain;
pub mod protocol;

pub use domain::connection::{
    CloseReason, Connection, ConnectionError, ConnectionEvent, ConnectionState, Limits,
};
pub use protocol::event::FrameEvent;
pub use protocol::frame::{FrameError, Opcode};
pub use protocol::handshake::HandshakeError;
