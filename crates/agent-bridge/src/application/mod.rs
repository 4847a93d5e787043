//! Application layer for the bridge.
//!
//! # What lives here?
//!
//! - **`backend`** – The capability traits every agent backend implements.
//!   A [`backend::BackendConnector`] is created once at startup from the
//!   configuration; it opens one [`backend::Backend`] per client connection.
//!
//! - **`connection`** – The per-connection loop: read one request frame from
//!   the client, forward it, write the reply back, repeat.  It owns the
//!   teardown order and the connection state machine.
//!
//! Nothing here knows whether the client arrived over a named pipe or a Unix
//! socket, or whether the backend is Pageant or an emulated socket.

pub mod backend;
pub mod connection;

pub use backend::{Backend, BackendConnector};
pub use connection::{ConnectionHandler, ConnectionSettings};
