//! Error taxonomy shared by every connection.
//!
//! Every failure that can end a connection maps to one [`BridgeError`]
//! variant.  None of them ever reaches the listener: the connection handler
//! logs the error, tears the connection down and the listener carries on.

use std::time::Duration;

use agent_bridge_core::{DescriptorError, FrameError};
use thiserror::Error;

/// Errors that end a single bridged connection.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required setting or environment value is absent.
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Bytes did not match a fixed marker or expected layout.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A frame declared a size above the configured limit.
    #[error("frame of {total} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { total: usize, max: usize },

    /// The agent window, descriptor file or socket could not be reached.
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A step of the emulated-socket handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The peer disconnected.  `received` counts the bytes of the
    /// unfinished frame; zero means the peer closed between frames.
    #[error("transport closed after {received} bytes of a frame")]
    TransportClosed { received: usize },

    /// An operation exceeded its configured time budget.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Any other I/O failure on an established channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Builds a [`BridgeError::BackendUnavailable`] without an I/O cause.
    pub fn backend_unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    /// Builds a [`BridgeError::BackendUnavailable`] caused by `source`.
    pub fn backend_io(reason: impl Into<String>, source: std::io::Error) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// `true` when the peer closed the channel cleanly between two frames.
    ///
    /// This is how every client session normally ends.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::TransportClosed { received: 0 })
    }
}

impl From<FrameError> for BridgeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { total, max } => Self::FrameTooLarge { total, max },
            FrameError::Incomplete { available, .. } => Self::TransportClosed {
                received: available,
            },
        }
    }
}

impl From<DescriptorError> for BridgeError {
    fn from(err: DescriptorError) -> Self {
        Self::ProtocolMismatch(err.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_too_large_converts_with_sizes() {
        let err: BridgeError = FrameError::TooLarge { total: 10, max: 8 }.into();
        assert!(matches!(
            err,
            BridgeError::FrameTooLarge { total: 10, max: 8 }
        ));
    }

    #[test]
    fn test_incomplete_frame_converts_to_transport_closed() {
        let err: BridgeError = FrameError::Incomplete {
            needed: 4,
            available: 2,
        }
        .into();
        assert!(matches!(err, BridgeError::TransportClosed { received: 2 }));
    }

    #[test]
    fn test_descriptor_error_converts_to_protocol_mismatch() {
        let err: BridgeError = DescriptorError::MissingMarker.into();
        match err {
            BridgeError::ProtocolMismatch(msg) => assert!(msg.contains("!<socket >")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_clean_close_only_between_frames() {
        assert!(BridgeError::TransportClosed { received: 0 }.is_clean_close());
        assert!(!BridgeError::TransportClosed { received: 2 }.is_clean_close());
        assert!(!BridgeError::backend_unavailable("x").is_clean_close());
    }

    #[test]
    fn test_backend_io_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = BridgeError::backend_io("connect 127.0.0.1:1", io);

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "backend unavailable: connect 127.0.0.1:1");
    }
}
