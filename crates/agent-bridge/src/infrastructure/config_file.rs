//! Optional TOML configuration file (`--config <path>`).
//!
//! Every key is optional.  Keys that are present override the built-in
//! defaults; command-line arguments and environment variables override the
//! file in turn.
//!
//! ```toml
//! endpoint = '\\.\pipe\openssh-ssh-agent'
//! backend = "socket"
//! max_frame_size = 262144
//! max_connections = 64
//!
//! [timeouts]
//! handshake_secs = 10
//! backend_secs = 30
//! idle_secs = 600
//!
//! [socket]
//! descriptor = 'C:\Users\me\.ssh\agent.sock'
//! strict_handshake = false
//! lock_retry_attempts = 50
//! lock_retry_delay_ms = 10
//! ```
//!
//! Unknown keys are rejected so that a typo does not silently fall back to a
//! default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{BackendKind, BridgeConfig, ConfigError};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not acceptable.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// Top-level keys of the config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    /// `"pageant"` or `"socket"`.
    pub backend: Option<String>,
    pub max_frame_size: Option<usize>,
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub socket: SocketSection,
}

/// `[timeouts]` table.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSection {
    pub handshake_secs: Option<u64>,
    pub backend_secs: Option<u64>,
    /// `0` disables the idle timeout.
    pub idle_secs: Option<u64>,
}

/// `[socket]` table: emulated-socket backend settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SocketSection {
    pub descriptor: Option<PathBuf>,
    pub strict_handshake: Option<bool>,
    pub lock_retry_attempts: Option<u32>,
    pub lock_retry_delay_ms: Option<u64>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Overwrites the fields of `config` that this file sets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError::Invalid`] for an unknown backend name.
    pub fn apply_to(&self, config: &mut BridgeConfig) -> Result<(), ConfigFileError> {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend = backend.parse::<BackendKind>()?;
        }
        if let Some(max) = self.max_frame_size {
            config.max_frame_size = max;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }

        if let Some(secs) = self.timeouts.handshake_secs {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.backend_secs {
            config.backend_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeouts.idle_secs {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(path) = &self.socket.descriptor {
            config.socket_descriptor = Some(path.clone());
        }
        if let Some(strict) = self.socket.strict_handshake {
            config.strict_handshake = strict;
        }
        if let Some(attempts) = self.socket.lock_retry_attempts {
            config.lock_retry.attempts = attempts;
        }
        if let Some(ms) = self.socket.lock_retry_delay_ms {
            config.lock_retry.delay = Duration::from_millis(ms);
        }
        Ok(())
    }
}

/// Reads and parses the config file at `path`.
///
/// Unlike an implicit default location, an explicitly named file must exist.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] if the file cannot be read and
/// [`ConfigFileError::Parse`] if it is not valid.
pub fn load(path: &Path) -> Result<FileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
