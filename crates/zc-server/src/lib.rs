//! zc-server library crate.
//!
//! A small WebSocket server for the zero-code editor.  Browsers open
//! `ws://host/ws/<stream-id>` and exchange text messages with every other
//! connection on the same stream; `/health` reports how many are open.
//!
//! # Architecture
//!
//! ```text
//! Browser (text frames over WebSocket)
//!         ↕
//! [zc-server]
//!   ├── domain/           ServerConfig, StreamId, routing
//!   ├── application/      StreamRegistry, StreamRelay (fan-out, health)
//!   └── infrastructure/
//!         ├── config_file/ TOML loading
//!         ├── socket/      Write-over-channel sink, request head reader
//!         └── ws_server/   accept loop and session tasks
//!         ↕
//! [zc-core]  handshake, frame codec, connection state machine
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O and has no async code.
//! - `application` depends on `domain` and Tokio's sync primitives only.
//! - `infrastructure` depends on all other layers plus Tokio networking.

/// Domain layer: configuration and routing types (no I/O).
pub mod domain;

/// Application layer: connection registry and message relay.
pub mod application;

/// Infrastructure layer: sockets, config file and the server loop.
pub mod infrastructure;
