//! Infrastructure layer for zc-server.
//!
//! Everything that touches the outside world lives here.
//!
//! # Responsibilities
//!
//! - Reading and writing the TOML config file
//! - Binding the TCP listener and spawning per-connection tasks
//! - Reading the HTTP request head and answering non-WebSocket routes
//! - Moving bytes between Tokio sockets and the `zc-core` frame engine
//! - Closing open connections on shutdown
//!
//! # What does NOT belong here?
//!
//! - Frame parsing or the handshake rules (that is `zc-core`)
//! - Who receives a relayed message (that is the application layer)

pub mod config_file;
pub mod socket;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_config, ConfigError};
pub use ws_server::{run_server, serve};
