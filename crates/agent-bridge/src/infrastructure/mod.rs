//! Infrastructure layer for the bridge.
//!
//! The infrastructure layer handles all I/O: the client endpoint, the two
//! agent transports, and the optional config file.  Everything here is
//! driven by the application layer's [`ConnectionHandler`] or by `main.rs`.
//!
//! [`ConnectionHandler`]: crate::application::ConnectionHandler

pub mod config_file;
pub mod emulated_socket;
pub mod endpoint;
pub mod frame_io;
pub mod listener;
pub mod pageant;

pub use listener::{build_connector, run_server, serve};
