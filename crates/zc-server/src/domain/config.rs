//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is built in three layers, later layers winning:
//!
//! 1. compiled-in defaults ([`ServerConfig::default`]),
//! 2. an optional TOML file (see `infrastructure::config_file`),
//! 3. CLI flags / environment variables (see `main.rs`).
//!
//! Example file:
//!
//! ```toml
//! bind_addr = "0.0.0.0:7681"
//! max_payload_len = 1048576
//! idle_timeout_secs = 300
//! max_send_queue_bytes = 4194304
//! log_level = "debug"
//! ```
//!
//! Every field carries a `#[serde(default = "...")]`, so a file only needs
//! the keys it wants to change.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zc_core::protocol::frame::DEFAULT_MAX_PAYLOAD_LEN;
use zc_core::protocol::handshake::DEFAULT_MAX_REQUEST_HEAD;
use zc_core::Limits;

/// All runtime configuration for the WebSocket server.
///
/// Build this once at startup and wrap it in an `Arc` so every connection
/// task can read it.
///
/// # Example
///
/// ```rust
/// use zc_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 7681);
/// assert!(cfg.idle_timeout().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    ///
    /// Defaults to loopback: the editor UI and its terminals are meant for
    /// the local user unless explicitly exposed.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Largest payload a single inbound frame may declare, in bytes.
    #[serde(default = "default_max_payload_len")]
    pub max_payload_len: usize,

    /// Largest HTTP request head accepted before the upgrade, in bytes.
    #[serde(default = "default_max_request_head")]
    pub max_request_head: usize,

    /// Close connections that send nothing for this many seconds.
    /// `0` disables the idle timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// Outbound bytes a connection may have queued but not yet written.
    ///
    /// A peer that stops reading is disconnected once its queue would grow
    /// past this.  A single frame larger than the cap is still sent when
    /// nothing else is queued.
    #[serde(default = "default_max_send_queue_bytes")]
    pub max_send_queue_bytes: usize,

    /// Fallback `tracing` filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7681))
}
fn default_max_payload_len() -> usize {
    DEFAULT_MAX_PAYLOAD_LEN
}
fn default_max_request_head() -> usize {
    DEFAULT_MAX_REQUEST_HEAD
}
fn default_max_send_queue_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    /// | Field                | Default          |
    /// |----------------------|------------------|
    /// | bind_addr            | `127.0.0.1:7681` |
    /// | max_payload_len      | 16 MiB           |
    /// | max_request_head     | 8 KiB            |
    /// | idle_timeout_secs    | 0 (disabled)     |
    /// | max_send_queue_bytes | 8 MiB            |
    /// | log_level            | `info`           |
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_len: default_max_payload_len(),
            max_request_head: default_max_request_head(),
            idle_timeout_secs: 0,
            max_send_queue_bytes: default_max_send_queue_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// The idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Per-connection limits for the frame engine.
    pub fn limits(&self) -> Limits {
        Limits {
            max_payload_len: self.max_payload_len,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
