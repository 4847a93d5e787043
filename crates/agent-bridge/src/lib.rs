//! agent-bridge library crate.
//!
//! This crate serves the SSH agent protocol on a local pipe and forwards each
//! request to an agent that lives somewhere the SSH client cannot reach on its
//! own: a Pageant-style GUI agent or a Cygwin/MSYS emulated Unix socket.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! SSH client (agent protocol over a named pipe / Unix socket)
//!         ↕
//! [agent-bridge]
//!   ├── domain/           Pure types: BridgeConfig, BridgeError, connection state
//!   ├── application/      Backend capability traits, per-connection loop
//!   └── infrastructure/
//!         ├── frame_io/         Async frame read/write over any byte stream
//!         ├── emulated_socket/  `!<socket >` handshake over loopback TCP
//!         ├── pageant/          Shared memory + WM_COPYDATA exchange
//!         ├── endpoint/         Named pipe (Windows) / Unix socket listener
//!         ├── listener/         Accept loop and bounded task spawning
//!         └── config_file/      Optional TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and on the tokio I/O *traits* only;
//!   it never opens a socket or a pipe itself.
//! - `infrastructure` provides the concrete transports.
//!
//! # For beginners: why this structure?
//!
//! The interesting part of the bridge is protocol plumbing: framing,
//! handshakes and teardown.  Keeping it behind traits means every rule can be
//! tested with scripted in-memory streams instead of a real Pageant window or
//! Cygwin socket.

/// Domain layer: configuration, error taxonomy and connection state.
pub mod domain;

/// Application layer: backend traits and the connection handler.
pub mod application;

/// Infrastructure layer: transports, listener and config file.
pub mod infrastructure;
