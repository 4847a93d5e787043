//! Connection identity and lifecycle.
//!
//! # Connection lifecycle (for beginners)
//!
//! Every accepted client moves through these states:
//!
//! ```text
//! Accepting ──► HandshakeInFlight ──► Serving ──► Closing ──► Closed
//!     │                │                             ▲
//!     └────────────────┴──────────► (skip) ──────────┘
//! ```
//!
//! - `Accepting`: the endpoint handed over a client stream; no backend yet.
//! - `HandshakeInFlight`: the emulated-socket handshake is running.  The
//!   Pageant backend has nothing to set up and goes straight to `Serving`.
//! - `Serving`: requests are read, forwarded and answered one at a time.
//! - `Closing`: the first fatal condition was seen; both sides are being
//!   released.  Reachable from every live state.
//! - `Closed`: everything has been released.
//!
//! No transition goes back to an earlier state.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of one bridged connection, used in every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client stream accepted, backend not yet connected.
    Accepting,
    /// Emulated-socket handshake in progress.
    HandshakeInFlight,
    /// Forwarding requests.
    Serving,
    /// Tearing down after the first fatal condition.
    Closing,
    /// Both sides released.
    Closed,
}

impl ConnectionState {
    /// `true` when moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Accepting, HandshakeInFlight)
                | (Accepting, Serving)
                | (HandshakeInFlight, Serving)
                | (Accepting | HandshakeInFlight | Serving, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepting => "accepting",
            Self::HandshakeInFlight => "handshake",
            Self::Serving => "serving",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Raised when code tries to move a connection backwards or skip teardown.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid connection transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Tracks the current state of one connection and enforces legal transitions.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    id: ConnectionId,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    /// Starts a lifecycle in [`ConnectionState::Accepting`].
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Accepting,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged when the
    /// move is not allowed.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        if self.state.can_advance_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    /// Enters [`ConnectionState::Closing`] unless teardown already started.
    ///
    /// Returns `true` when this call started the teardown.
    pub fn begin_close(&mut self) -> bool {
        self.advance(ConnectionState::Closing).is_ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
