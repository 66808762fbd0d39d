//! zc-server entry point.
//!
//! Serves the editor's WebSocket streams.  Browsers connect to
//! `ws://host:PORT/ws/<stream-id>`; every text message a client sends is
//! relayed to all connections on that stream.
//!
//! # Usage
//!
//! ```text
//! zc-server [OPTIONS]
//!
//! Options:
//!   --config       <PATH>   TOML config file (missing file = defaults)
//!   --bind         <ADDR>   Listen address [default: 127.0.0.1:7681]
//!   --max-payload  <BYTES>  Largest inbound frame payload [default: 16777216]
//!   --idle-timeout <SECS>   Close silent connections, 0 = never [default: 0]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable          | Flag             |
//! |-------------------|------------------|
//! | `ZC_CONFIG`       | `--config`       |
//! | `ZC_BIND`         | `--bind`         |
//! | `ZC_MAX_PAYLOAD`  | `--max-payload`  |
//! | `ZC_IDLE_TIMEOUT` | `--idle-timeout` |
//!
//! Precedence, highest first: flag, environment variable, config file,
//! built-in default.  `RUST_LOG` overrides the file's `log_level`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zc_server::domain::ServerConfig;
use zc_server::infrastructure::{load_config, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket stream server for the zero-code editor.
///
/// Every flag is optional; anything left unset falls back to the config file
/// and then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "zc-server",
    about = "Raw-socket WebSocket server for zero-code editor streams",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "ZC_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. `0.0.0.0:7681`.
    #[arg(long, env = "ZC_BIND")]
    bind: Option<String>,

    /// Largest payload an inbound frame may declare, in bytes.
    #[arg(long, env = "ZC_MAX_PAYLOAD")]
    max_payload: Option<usize>,

    /// Seconds of inbound silence before a connection is closed (0 = never).
    #[arg(long, env = "ZC_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,
}

impl Cli {
    /// Layers the CLI flags over the config file (or the defaults).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// `--bind` is not a valid socket address.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_addr = bind
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
        }
        if let Some(max_payload) = self.max_payload {
            config.max_payload_len = max_payload;
        }
        if let Some(idle_timeout) = self.idle_timeout {
            config.idle_timeout_secs = idle_timeout;
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_server_config()?;

    // `RUST_LOG` wins; otherwise use the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "zc-server starting: bind={}, max_payload={}, idle_timeout={}s",
        config.bind_addr, config.max_payload_len, config.idle_timeout_secs
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    //
    // The accept loop polls this every 200 ms.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("zc-server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
