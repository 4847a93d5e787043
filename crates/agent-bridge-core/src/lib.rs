//! # agent-bridge-core
//!
//! Shared protocol library for the SSH agent bridge.
//!
//! This crate holds everything about the bytes on the wire that can be
//! expressed without touching a socket, a pipe or a window handle.  It has
//! zero dependencies on OS APIs or async runtimes, so every rule here can be
//! tested with plain byte slices.
//!
//! # Architecture overview (for beginners)
//!
//! The bridge sits between an SSH client (which speaks the SSH agent protocol
//! on a local pipe) and an agent living in a different environment.  Two kinds
//! of agent are supported: a Pageant-style GUI agent reached through shared
//! memory, and a Cygwin/MSYS-style agent reached through a TCP socket that
//! pretends to be a Unix domain socket.
//!
//! This crate (`agent-bridge-core`) is the shared foundation.  It defines:
//!
//! - **`protocol::frame`** – The SSH agent framing rule: a 4-byte big-endian
//!   length followed by that many bytes.  A [`FrameAccumulator`] collects
//!   partial reads until a frame is complete and enforces the size limit.
//!
//! - **`protocol::socket_file`** – The `!<socket >` descriptor file that
//!   advertises the TCP port and cookie of an emulated Unix socket.
//!
//! - **`protocol::handshake`** – The 16-byte cookie and 12-byte credential
//!   records exchanged when connecting to an emulated Unix socket.
//!
//! - **`protocol::request_id`** – Process-unique identifiers used to name the
//!   shared-memory region of each Pageant request.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `agent_bridge_core::FrameAccumulator` instead of the full module path.
pub use protocol::frame::{FrameAccumulator, FrameError, LENGTH_PREFIX_SIZE};
pub use protocol::handshake::{PeerCredentials, SocketCookie};
pub use protocol::request_id::RequestIdGenerator;
pub use protocol::socket_file::{DescriptorError, SocketDescriptor};
