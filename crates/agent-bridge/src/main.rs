//! SSH agent bridge: entry point.
//!
//! This binary serves the SSH agent protocol on a local endpoint and forwards
//! every request to an agent the SSH client cannot reach by itself.
//!
//! # Usage
//!
//! ```text
//! agent-bridge [OPTIONS] [PIPE_PATH]
//!
//! Arguments:
//!   [PIPE_PATH]  Endpoint to serve [default: \\.\pipe\openssh-ssh-agent on
//!                Windows, /tmp/agent-bridge.sock elsewhere]
//!
//! Options:
//!   --backend <pageant|socket>     Agent to forward to [default: pageant]
//!   --config <FILE>                Optional TOML config file
//!   --socket-descriptor <PATH>     `!<socket >` file of the emulated socket
//!   --max-frame-size <BYTES>       Largest accepted frame [default: 262144]
//!   --max-connections <N>          Concurrent clients [default: 64]
//!   --handshake-timeout <SECS>     [default: 10]
//!   --backend-timeout <SECS>       [default: 30]
//!   --idle-timeout <SECS>          0 disables [default: 0]
//!   --strict-handshake             Reject a mismatched cookie echo
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                       | Option                |
//! |--------------------------------|-----------------------|
//! | `AGENT_BRIDGE_BACKEND`         | `--backend`           |
//! | `AGENT_BRIDGE_CONFIG`          | `--config`            |
//! | `SSH_AUTH_SOCK`                | `--socket-descriptor` |
//! | `AGENT_BRIDGE_MAX_FRAME_SIZE`  | `--max-frame-size`    |
//! | `AGENT_BRIDGE_MAX_CONNECTIONS` | `--max-connections`   |
//!
//! Precedence: command line, then environment, then config file, then
//! built-in defaults.
//!
//! # Architecture overview
//!
//! ```text
//! ssh / git  (SSH agent protocol over a named pipe or Unix socket)
//!       ↕
//! agent-bridge  ← this process
//!   domain/          BridgeConfig, BridgeError, connection state
//!   application/     ConnectionHandler, Backend traits
//!   infrastructure/
//!     listener/         Accept loop
//!     pageant/          Shared memory + WM_COPYDATA
//!     emulated_socket/  `!<socket >` handshake over loopback TCP
//!       ↕
//! Pageant  or  Cygwin/MSYS ssh-agent
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use agent_bridge::domain::config::{validate_endpoint, DEFAULT_ENDPOINT};
use agent_bridge::domain::{BackendKind, BridgeConfig, ConfigError};
use agent_bridge::infrastructure::{config_file, run_server};
use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serves the SSH agent protocol locally and forwards it to Pageant or to an
/// emulated Unix socket agent.
#[derive(Debug, Parser)]
#[command(name = "agent-bridge", version)]
struct Cli {
    /// Endpoint to serve.  Must start with `\\.` on Windows or `/` elsewhere.
    #[arg(value_name = "PIPE_PATH", value_parser = parse_endpoint)]
    endpoint: Option<String>,

    /// Agent to forward requests to: `pageant` or `socket`.
    #[arg(long, env = "AGENT_BRIDGE_BACKEND")]
    backend: Option<BackendKind>,

    /// TOML config file.  Command-line options override its values.
    #[arg(long, value_name = "FILE", env = "AGENT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Descriptor file of the emulated Unix socket.
    #[arg(long, value_name = "PATH", env = "SSH_AUTH_SOCK")]
    socket_descriptor: Option<PathBuf>,

    /// Largest accepted frame in bytes, length prefix included.
    #[arg(long, value_name = "BYTES", env = "AGENT_BRIDGE_MAX_FRAME_SIZE")]
    max_frame_size: Option<usize>,

    /// Number of clients served at the same time.
    #[arg(long, value_name = "N", env = "AGENT_BRIDGE_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Seconds allowed for the emulated-socket handshake.
    #[arg(long, value_name = "SECS")]
    handshake_timeout: Option<u64>,

    /// Seconds allowed for one backend round trip.
    #[arg(long, value_name = "SECS")]
    backend_timeout: Option<u64>,

    /// Seconds a client may stay idle between requests; 0 disables.
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Reject the handshake when the agent echoes a different cookie.
    #[arg(long)]
    strict_handshake: bool,
}

fn parse_endpoint(value: &str) -> Result<String, ConfigError> {
    validate_endpoint(value)?;
    Ok(value.to_string())
}

impl Cli {
    /// Layers the config file (if any) and then these arguments over the
    /// defaults, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the final
    /// configuration is out of range.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::default();

        if let Some(path) = &self.config {
            let file = config_file::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            file.apply_to(&mut config)
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }

        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(path) = self.socket_descriptor {
            config.socket_descriptor = Some(path);
        }
        if let Some(max) = self.max_frame_size {
            config.max_frame_size = max;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.handshake_timeout {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.backend_timeout {
            config.backend_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if self.strict_handshake {
            config.strict_handshake = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Parses the command line.  Bad arguments print usage and exit with
/// status 1; `--help` and `--version` exit normally.
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            eprintln!("\n  PIPE_PATH defaults to {DEFAULT_ENDPOINT}");
            std::process::exit(1);
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; `RUST_LOG` overrides the default
///    `info` level.
/// 2. Arguments, environment and the optional config file are merged into a
///    [`BridgeConfig`].
/// 3. A Ctrl+C handler clears a shared `AtomicBool`.
/// 4. [`run_server`] binds the endpoint and serves clients until the flag is
///    cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = parse_cli().into_bridge_config()?;

    info!(
        "agent-bridge {} starting: endpoint={}, backend={}, max_frame_size={}",
        env!("CARGO_PKG_VERSION"),
        config.endpoint,
        config.backend,
        config.max_frame_size
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("agent-bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
