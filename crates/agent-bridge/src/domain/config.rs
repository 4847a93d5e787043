//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is assembled by `main.rs` from defaults, an optional TOML file,
//! environment variables and CLI arguments, then validated once and shared
//! read-only by every connection.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) makes the bridge easy to embed in tests.  Even
//! `SSH_AUTH_SOCK` is resolved by the CLI layer and stored here as a path.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use agent_bridge_core::protocol::DEFAULT_MAX_FRAME_SIZE;
use thiserror::Error;

/// Endpoint served when no path is given on the command line.
#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = r"\\.\pipe\openssh-ssh-agent";
/// Endpoint served when no path is given on the command line.
#[cfg(not(windows))]
pub const DEFAULT_ENDPOINT: &str = "/tmp/agent-bridge.sock";

/// Every endpoint path must start with this prefix.
#[cfg(windows)]
pub const REQUIRED_ENDPOINT_PREFIX: &str = r"\\.";
/// Every endpoint path must start with this prefix.
#[cfg(not(windows))]
pub const REQUIRED_ENDPOINT_PREFIX: &str = "/";

/// Smallest accepted `max_frame_size`: a prefix plus a message type byte,
/// rounded up.
pub const MIN_FRAME_SIZE_LIMIT: usize = 8;

/// Largest accepted `max_frame_size` (16 MiB).
pub const MAX_FRAME_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Errors produced when a configuration value is out of range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The endpoint path does not start with the required prefix.
    #[error("invalid endpoint `{endpoint}`, must start with `{prefix}`")]
    InvalidEndpoint {
        endpoint: String,
        prefix: &'static str,
    },

    /// The maximum frame size is outside the supported range.
    #[error("max frame size {0} is outside {MIN_FRAME_SIZE_LIMIT}..={MAX_FRAME_SIZE_LIMIT}")]
    FrameSizeOutOfRange(usize),

    /// At least one connection must be allowed.
    #[error("max connections must be at least 1")]
    NoConnectionCapacity,

    /// A timeout that bounds every connection is zero.  Only the idle
    /// timeout may be disabled.
    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    /// The backend name is not recognised.
    #[error("unknown backend `{0}` (expected `pageant` or `socket`)")]
    UnknownBackend(String),
}

/// Which kind of agent the bridge forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// A Pageant-style GUI agent reached through shared memory and
    /// `WM_COPYDATA`; one short-lived exchange per request.
    Pageant,
    /// An agent behind a Cygwin/MSYS emulated Unix socket; one persistent
    /// TCP stream per connection.
    EmulatedSocket,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pageant" => Ok(Self::Pageant),
            "socket" | "emulated-socket" => Ok(Self::EmulatedSocket),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pageant => f.write_str("pageant"),
            Self::EmulatedSocket => f.write_str("socket"),
        }
    }
}

/// Bounded retry used while another process holds the descriptor file open
/// exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_millis(10),
        }
    }
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use agent_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.max_frame_size, 262_144);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path of the named pipe (Windows) or Unix socket served to SSH clients.
    pub endpoint: String,

    /// Backend that answers the forwarded requests.
    pub backend: BackendKind,

    /// Descriptor file of the emulated Unix socket, normally taken from
    /// `SSH_AUTH_SOCK`.  Only consulted by [`BackendKind::EmulatedSocket`].
    pub socket_descriptor: Option<PathBuf>,

    /// Upper bound for a whole frame, prefix included.  Also the size of each
    /// Pageant shared-memory region and of the pipe buffers.
    pub max_frame_size: usize,

    /// Upper bound for the emulated-socket handshake, from opening the
    /// descriptor file to receiving the credential echo.
    pub handshake_timeout: Duration,

    /// Upper bound for one backend round trip.
    pub backend_timeout: Duration,

    /// Upper bound for waiting on the next client request.  `None` lets
    /// clients hold idle connections indefinitely, which `ssh` does.
    pub idle_timeout: Option<Duration>,

    /// Reject the emulated-socket handshake when the echoed cookie differs
    /// from the one sent.
    pub strict_handshake: bool,

    /// Number of connections served at the same time.  Further clients wait
    /// in the accept queue until a slot frees up.
    pub max_connections: usize,

    /// Retry policy for opening a descriptor file locked by another process.
    pub lock_retry: RetryPolicy,
}

impl BridgeConfig {
    /// Checks every value that cannot be expressed in the type system.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.endpoint)?;
        if !(MIN_FRAME_SIZE_LIMIT..=MAX_FRAME_SIZE_LIMIT).contains(&self.max_frame_size) {
            return Err(ConfigError::FrameSizeOutOfRange(self.max_frame_size));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnectionCapacity);
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("handshake"));
        }
        if self.backend_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("backend"));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    /// | Field             | Default                         |
    /// |-------------------|---------------------------------|
    /// | endpoint          | [`DEFAULT_ENDPOINT`]            |
    /// | backend           | `pageant`                       |
    /// | socket_descriptor | none                            |
    /// | max_frame_size    | 262144                          |
    /// | handshake_timeout | 10 seconds                      |
    /// | backend_timeout   | 30 seconds                      |
    /// | idle_timeout      | none                            |
    /// | strict_handshake  | `false`                         |
    /// | max_connections   | 64                              |
    /// | lock_retry        | 50 attempts, 10 ms apart        |
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            backend: BackendKind::Pageant,
            socket_descriptor: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Duration::from_secs(10),
            backend_timeout: Duration::from_secs(30),
            idle_timeout: None,
            strict_handshake: false,
            max_connections: 64,
            lock_retry: RetryPolicy::default(),
        }
    }
}

/// Checks that `endpoint` starts with [`REQUIRED_ENDPOINT_PREFIX`].
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEndpoint`] otherwise.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    if endpoint.starts_with(REQUIRED_ENDPOINT_PREFIX) {
        Ok(())
    } else {
        Err(ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            prefix: REQUIRED_ENDPOINT_PREFIX,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
