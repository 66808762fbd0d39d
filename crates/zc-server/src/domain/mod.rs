//! Domain layer for zc-server.
//!
//! Pure types with no sockets, no async and no file access:
//!
//! - [`ServerConfig`]: every runtime setting, with defaults.
//! - [`Route`] / [`StreamId`]: what a request path means.
//!
//! Reading the config file and talking to sockets belongs to the
//! infrastructure layer.

pub mod config;
pub mod route;

pub use config::ServerConfig;
pub use route::{route, Route, StreamId, StreamIdError};
