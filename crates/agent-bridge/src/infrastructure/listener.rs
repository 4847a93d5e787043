//! Accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Building the backend connector chosen by the configuration.
//! 2. Binding the client endpoint (named pipe or Unix socket).
//! 3. Accepting clients and spawning one [`ConnectionHandler`] task each.
//! 4. Stopping when the `running` flag is cleared by Ctrl+C.
//!
//! # Bounded concurrency
//!
//! A semaphore holds `max_connections` permits.  The loop takes a permit
//! *before* accepting, so once the bridge is at capacity new clients wait in
//! the OS accept queue instead of piling up as tasks.  The permit moves into
//! the connection task and is returned when the task ends.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::application::{BackendConnector, ConnectionHandler, ConnectionSettings};
use crate::domain::{BackendKind, BridgeConfig};
use crate::infrastructure::emulated_socket::EmulatedSocketConnector;
use crate::infrastructure::endpoint::EndpointListener;

/// How often the loop wakes up to check the `running` flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the bridge until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the backend is unavailable on this platform or the
/// endpoint cannot be created (for example because another agent already
/// serves it).  Errors of individual connections are logged and never end
/// the server.
pub async fn run_server(config: BridgeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let connector = build_connector(&config)?;

    let mut listener = EndpointListener::bind(&config.endpoint, config.max_frame_size)
        .with_context(|| format!("failed to create endpoint {}", config.endpoint))?;

    info!(
        "serving SSH agent requests on {} via the {} backend",
        config.endpoint, config.backend
    );

    serve(
        &mut listener,
        connector,
        ConnectionSettings::from(&config),
        config.max_connections,
        running,
    )
    .await;
    Ok(())
}

/// Accepts clients on `listener` until `running` is cleared.
pub async fn serve(
    listener: &mut EndpointListener,
    connector: Arc<dyn BackendConnector>,
    settings: ConnectionSettings,
    max_connections: usize,
    running: Arc<AtomicBool>,
) {
    let limiter = Arc::new(Semaphore::new(max_connections));

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        let permit = match timeout(SHUTDOWN_POLL, Arc::clone(&limiter).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                error!("connection limiter closed; stopping accept loop");
                break;
            }
            // At capacity for the last poll interval.
            Err(_) => continue,
        };

        match timeout(SHUTDOWN_POLL, listener.accept()).await {
            Ok(Ok(stream)) => {
                let handler = ConnectionHandler::new(Arc::clone(&connector), settings);
                info!("connection {}: client connected", handler.id());
                tokio::spawn(async move {
                    let _permit = permit;
                    // The handler logs its own outcome.
                    let _ = handler.run(stream).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error; keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    let open = max_connections - limiter.available_permits();
    if open > 0 {
        info!("{open} connection(s) still open at shutdown");
    }
}

/// Builds the connector for `config.backend`.
///
/// # Errors
///
/// Returns an error when the Pageant backend is requested on a platform
/// without Pageant.
pub fn build_connector(config: &BridgeConfig) -> anyhow::Result<Arc<dyn BackendConnector>> {
    match config.backend {
        BackendKind::Pageant => pageant_connector(config),
        BackendKind::EmulatedSocket => {
            if config.socket_descriptor.is_none() {
                warn!("SSH_AUTH_SOCK is not set; every connection will fail until it is");
            }
            Ok(Arc::new(EmulatedSocketConnector::new(config)))
        }
    }
}

#[cfg(target_os = "windows")]
fn pageant_connector(config: &BridgeConfig) -> anyhow::Result<Arc<dyn BackendConnector>> {
    use crate::infrastructure::pageant::{PageantConnector, Win32Pageant};

    Ok(Arc::new(PageantConnector::new(
        Win32Pageant::new(),
        config.max_frame_size,
    )))
}

#[cfg(not(target_os = "windows"))]
fn pageant_connector(_config: &BridgeConfig) -> anyhow::Result<Arc<dyn BackendConnector>> {
    anyhow::bail!("the pageant backend needs Windows; use `--backend socket` on this platform")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
