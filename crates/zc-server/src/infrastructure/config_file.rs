//! TOML persistence for [`ServerConfig`].
//!
//! The server reads an optional config file named on the command line
//! (`--config` / `ZC_CONFIG`).  A missing file is not an error: the server
//! simply runs with defaults, which keeps first launch friction-free.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads the configuration at `path`.
///
/// Returns [`ServerConfig::default`] if the file does not exist.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file exists but cannot be read.
/// - [`ConfigError::Parse`] if the content is not valid TOML for the schema.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
