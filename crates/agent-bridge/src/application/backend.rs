//! Backend capability traits.
//!
//! Two very different agents sit behind the same interface:
//!
//! | Backend         | Handle lifetime             | Setup per connection        |
//! |-----------------|-----------------------------|-----------------------------|
//! | Pageant         | one region per request      | none                        |
//! | Emulated socket | one TCP stream per client   | `!<socket >` handshake      |
//!
//! The connection handler only sees [`Backend`]: "here is a request frame,
//! give me the reply frame".  Infrastructure implementations live in
//! `infrastructure::pageant` and `infrastructure::emulated_socket`; tests use
//! the `MockBackend` generated by `mockall`.

use async_trait::async_trait;

use crate::domain::{BackendKind, BridgeError, ConnectionId};

/// A connection-scoped channel to the agent.
///
/// Implementations receive and return *whole frames*, length prefix included.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send {
    /// Which backend variant this is.
    fn kind(&self) -> BackendKind;

    /// Forwards one request frame and returns the agent's reply frame.
    ///
    /// # Errors
    ///
    /// Any error ends the connection; it is never retried.
    async fn send_request(&mut self, frame: &[u8]) -> Result<Vec<u8>, BridgeError>;

    /// Releases connection-scoped resources.  Called exactly once, after the
    /// client side has been torn down.
    async fn close(&mut self);
}

/// Opens a [`Backend`] for each accepted client.
///
/// One connector is built at startup and shared by every connection task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Which backend variant this connector produces.
    fn kind(&self) -> BackendKind;

    /// Establishes the backend side of connection `id`, including any
    /// handshake.
    async fn connect(&self, id: ConnectionId) -> Result<Box<dyn Backend>, BridgeError>;
}
