//! Pageant backend: shared memory plus a `WM_COPYDATA` notification.
//!
//! # How a Pageant request works (for beginners)
//!
//! Pageant is a GUI program, not a server.  It never listens on a socket.
//! Instead a caller:
//!
//! 1. creates a named shared-memory region and copies the request frame into
//!    it;
//! 2. finds the hidden window of class `Pageant` and sends it a
//!    `WM_COPYDATA` message whose payload is the region's name;
//! 3. waits: `SendMessage` only returns after Pageant has written its reply
//!    frame into the same region;
//! 4. copies the reply out and releases the region.
//!
//! Every request gets its own region, named
//! `PageantRequest{pid:08x}{id:016x}` from a process-wide atomic counter, so
//! two connections in flight at the same time never share one.
//!
//! # Platform split
//!
//! The steps above are expressed against the [`PageantIpc`] trait.
//! `windows.rs` implements it with Win32 calls; `mock.rs` implements it in
//! memory so the exchange logic can be tested on every platform.

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

use std::sync::Arc;

use agent_bridge_core::protocol::declared_length;
use agent_bridge_core::protocol::frame::frame_len;
use agent_bridge_core::RequestIdGenerator;
use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::application::backend::{Backend, BackendConnector};
use crate::domain::{BackendKind, BridgeError, ConnectionId};
use crate::infrastructure::frame_io::hex_dump;

pub use mock::InMemoryPageant;
#[cfg(target_os = "windows")]
pub use self::windows::Win32Pageant;

/// `dwData` value that marks a `WM_COPYDATA` message as an agent request.
pub const AGENT_COPYDATA_ID: usize = 0x804e_50ba;

/// Window class and title of the Pageant window.
pub const PAGEANT_WINDOW: &str = "Pageant";

/// A named shared-memory region, released when dropped.
pub trait SharedRegion {
    /// Name the agent uses to open the region.
    fn name(&self) -> &str;

    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];
}

/// The two native operations a Pageant exchange needs.
///
/// Both calls block, so they always run on tokio's blocking thread pool.
pub trait PageantIpc: Send + Sync + 'static {
    type Region: SharedRegion;

    /// Creates a new region of `size` bytes called `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::BackendUnavailable`] if the region cannot be created or
    /// a region with that name already exists.
    fn create_region(&self, name: &str, size: usize) -> Result<Self::Region, BridgeError>;

    /// Tells the agent to process the request in `region`.  Returns once the
    /// reply has been written into the region.
    ///
    /// # Errors
    ///
    /// [`BridgeError::BackendUnavailable`] if no agent window exists or the
    /// agent rejected the message.
    fn notify_agent(&self, region: &mut Self::Region) -> Result<(), BridgeError>;
}

/// Runs one complete request/reply exchange.
///
/// `request` must be a whole frame.  The reply length is taken from the
/// region's first four bytes; a length that would run past the region is
/// clamped to the region size.
///
/// # Errors
///
/// - [`BridgeError::FrameTooLarge`] if `request` does not fit the region.
/// - Any error of [`PageantIpc::create_region`] or [`PageantIpc::notify_agent`].
pub fn exchange<I>(
    ipc: &I,
    ids: &RequestIdGenerator,
    request: &[u8],
    region_size: usize,
) -> Result<Vec<u8>, BridgeError>
where
    I: PageantIpc + ?Sized,
{
    if request.len() > region_size {
        return Err(BridgeError::FrameTooLarge {
            total: request.len(),
            max: region_size,
        });
    }

    let name = ids.next_region_name();
    let mut region = ipc.create_region(&name, region_size)?;
    region.as_mut_slice()[..request.len()].copy_from_slice(request);
    trace!("pageant {name}: sending {}", hex_dump(request));

    ipc.notify_agent(&mut region)?;

    let shared = region.as_slice();
    let declared = declared_length(shared)
        .map(frame_len)
        .ok_or_else(|| BridgeError::ProtocolMismatch("shared region shorter than a prefix".into()))?;
    let reply_len = if declared > shared.len() {
        warn!(
            "pageant {name}: reply declares {declared} bytes, clamping to {}",
            shared.len()
        );
        shared.len()
    } else {
        declared
    };

    let reply = shared[..reply_len].to_vec();
    trace!("pageant {name}: received {}", hex_dump(&reply));
    Ok(reply)
}

// ── Connector / backend ───────────────────────────────────────────────────────

/// Hands out [`PageantBackend`]s that share one IPC implementation and one
/// request id counter.
pub struct PageantConnector<I> {
    ipc: Arc<I>,
    ids: Arc<RequestIdGenerator>,
    region_size: usize,
}

impl<I: PageantIpc> PageantConnector<I> {
    /// `region_size` is the size of every shared-memory region, normally the
    /// configured maximum frame size.
    pub fn new(ipc: I, region_size: usize) -> Self {
        Self {
            ipc: Arc::new(ipc),
            ids: Arc::new(RequestIdGenerator::new()),
            region_size,
        }
    }

    pub fn ipc(&self) -> &I {
        &self.ipc
    }
}

#[async_trait]
impl<I: PageantIpc> BackendConnector for PageantConnector<I> {
    fn kind(&self) -> BackendKind {
        BackendKind::Pageant
    }

    async fn connect(&self, id: ConnectionId) -> Result<Box<dyn Backend>, BridgeError> {
        Ok(Box::new(PageantBackend {
            id,
            ipc: Arc::clone(&self.ipc),
            ids: Arc::clone(&self.ids),
            region_size: self.region_size,
        }))
    }
}

/// Connection-scoped Pageant handle.  Holds no native resource between
/// requests; every request creates and releases its own region.
pub struct PageantBackend<I> {
    id: ConnectionId,
    ipc: Arc<I>,
    ids: Arc<RequestIdGenerator>,
    region_size: usize,
}

#[async_trait]
impl<I: PageantIpc> Backend for PageantBackend<I> {
    fn kind(&self) -> BackendKind {
        BackendKind::Pageant
    }

    async fn send_request(&mut self, frame: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let ipc = Arc::clone(&self.ipc);
        let ids = Arc::clone(&self.ids);
        let request = frame.to_vec();
        let region_size = self.region_size;

        debug!("connection {}: {} bytes to pageant", self.id, request.len());
        tokio::task::spawn_blocking(move || exchange(&*ipc, &ids, &request, region_size))
            .await
            .map_err(|e| BridgeError::backend_unavailable(format!("pageant exchange aborted: {e}")))?
    }

    async fn close(&mut self) {
        trace!("connection {}: pageant backend released", self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
