//! ConnectionHandler: serves one SSH client until it goes away.
//!
//! # Request loop
//!
//! ```text
//! read_frame(client)  ──►  backend.send_request(frame)  ──►  write_frame(client, reply)
//!        ▲                                                              │
//!        └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reply N is fully written before request N+1 is read, so the client never
//! sees replies out of order.
//!
//! # Teardown
//!
//! However the loop ends, the handler always runs the same steps in order:
//! flush the client, shut it down (on Windows this disconnects the pipe
//! instance), drop it, then close the backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::application::backend::{Backend, BackendConnector};
use crate::domain::{
    BackendKind, BridgeConfig, BridgeError, ConnectionId, ConnectionLifecycle, ConnectionState,
};
use crate::infrastructure::frame_io::{read_frame, write_frame};

/// The subset of [`BridgeConfig`] a connection needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub max_frame_size: usize,
    pub handshake_timeout: Duration,
    pub backend_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl From<&BridgeConfig> for ConnectionSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
            handshake_timeout: config.handshake_timeout,
            backend_timeout: config.backend_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Owns one client connection and its backend for their whole lifetime.
pub struct ConnectionHandler {
    lifecycle: ConnectionLifecycle,
    connector: Arc<dyn BackendConnector>,
    settings: ConnectionSettings,
}

impl ConnectionHandler {
    /// Creates a handler with a fresh [`ConnectionId`].
    pub fn new(connector: Arc<dyn BackendConnector>, settings: ConnectionSettings) -> Self {
        Self {
            lifecycle: ConnectionLifecycle::new(ConnectionId::new()),
            connector,
            settings,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.lifecycle.id()
    }

    /// Serves `client` until it disconnects or a fatal error occurs, then
    /// tears both sides down.
    ///
    /// The outcome is logged here.  It is also returned so callers and tests
    /// can inspect it; `Ok(())` means the client hung up between requests or
    /// while its reply was being written.
    pub async fn run<S>(mut self, client: S) -> Result<(), BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = self.id();
        let mut client = client;
        let mut backend: Option<Box<dyn Backend>> = None;

        debug!("connection {id}: accepted");
        let result = self.serve(&mut client, &mut backend).await;

        match &result {
            Ok(()) => info!("connection {id}: client disconnected"),
            Err(e @ BridgeError::TransportClosed { .. }) => {
                warn!("connection {id}: client went away mid-frame: {e}")
            }
            Err(e) => warn!("connection {id}: closing after error: {e}"),
        }

        self.teardown(client, backend).await;
        result
    }

    /// Connects the backend, then runs the request loop.
    async fn serve<S>(
        &mut self,
        client: &mut S,
        backend_slot: &mut Option<Box<dyn Backend>>,
    ) -> Result<(), BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = self.id();

        if self.connector.kind() == BackendKind::EmulatedSocket {
            self.advance(ConnectionState::HandshakeInFlight);
        }
        let backend = with_timeout(
            "backend handshake",
            Some(self.settings.handshake_timeout),
            self.connector.connect(id),
        )
        .await?;
        let backend = backend_slot.insert(backend);
        self.advance(ConnectionState::Serving);
        debug!("connection {id}: serving via {}", backend.kind());

        loop {
            let request = match with_timeout(
                "client read",
                self.settings.idle_timeout,
                read_frame(client, self.settings.max_frame_size),
            )
            .await
            {
                Ok(frame) => frame,
                Err(e) if e.is_clean_close() => return Ok(()),
                Err(e) => return Err(e),
            };
            debug!("connection {id}: request of {} bytes", request.len());

            let reply = with_timeout(
                "backend reply",
                Some(self.settings.backend_timeout),
                backend.send_request(&request),
            )
            .await?;
            debug!("connection {id}: reply of {} bytes", reply.len());

            match write_frame(client, &reply).await {
                Ok(()) => {}
                Err(e) if e.is_clean_close() => {
                    debug!("connection {id}: client hung up before the reply was written");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn teardown<S>(&mut self, mut client: S, backend: Option<Box<dyn Backend>>)
    where
        S: AsyncWrite + Unpin,
    {
        let id = self.id();
        self.lifecycle.begin_close();

        if let Err(e) = client.flush().await {
            debug!("connection {id}: flush on close failed: {e}");
        }
        if let Err(e) = client.shutdown().await {
            debug!("connection {id}: shutdown on close failed: {e}");
        }
        drop(client);

        if let Some(mut backend) = backend {
            backend.close().await;
        }

        self.advance(ConnectionState::Closed);
        debug!("connection {id}: closed");
    }

    fn advance(&mut self, next: ConnectionState) {
        if let Err(e) = self.lifecycle.advance(next) {
            warn!("connection {}: {e}", self.id());
        }
    }
}

/// Bounds `fut` by `limit`; `None` waits forever.
async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Option<Duration>,
    fut: F,
) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| BridgeError::Timeout { operation, after })?,
        None => fut.await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
