//! Domain layer for agent-bridge.
//!
//! Pure types with no dependencies on I/O, async runtimes or the OS.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures and their validation
//! - The error taxonomy shared by every connection
//! - Connection identity and the connection state machine
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, pipe, socket or window handle types
//! - Environment variable or file reads (the CLI layer resolves those)

pub mod config;
pub mod connection;
pub mod error;

pub use config::{BackendKind, BridgeConfig, ConfigError, RetryPolicy};
pub use connection::{ConnectionId, ConnectionLifecycle, ConnectionState, InvalidTransition};
pub use error::BridgeError;
