//! Async frame I/O over any byte stream.
//!
//! Both sides of the bridge speak the same framing: the client pipe and the
//! emulated-socket TCP stream.  These two functions are the only place where
//! frames meet a real `AsyncRead`/`AsyncWrite`.

use std::fmt::Write as _;
use std::io;

use agent_bridge_core::FrameAccumulator;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::domain::BridgeError;

/// Upper bound for a single `read()` call.
const READ_CHUNK: usize = 16 * 1024;

/// Bytes shown by [`hex_dump`] before the output is cut short.
const HEX_DUMP_LIMIT: usize = 64;

/// Reads exactly one frame from `reader`.
///
/// Each read asks for at most the bytes still missing from the current frame,
/// so bytes of the following frame stay in the stream.
///
/// # Errors
///
/// - [`BridgeError::FrameTooLarge`] as soon as the prefix declares a frame
///   above `max_frame_size`; no payload is read.
/// - [`BridgeError::TransportClosed`] when the peer disconnects.  `received`
///   is zero if it disconnected between frames.
/// - [`BridgeError::Io`] for any other read failure.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>, BridgeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut acc = FrameAccumulator::new(max_frame_size);
    let mut chunk = vec![0u8; READ_CHUNK.min(max_frame_size)];

    while !acc.is_complete() {
        let want = acc.missing().min(chunk.len());
        let n = match reader.read(&mut chunk[..want]).await {
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => {
                return Err(BridgeError::TransportClosed {
                    received: acc.received(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(BridgeError::TransportClosed {
                received: acc.received(),
            });
        }
        acc.push(&chunk[..n])?;
    }

    let frame = acc.into_frame()?;
    trace!("read frame {}", hex_dump(&frame));
    Ok(frame)
}

/// Writes `frame` (which already carries its prefix) and flushes.
///
/// # Errors
///
/// Returns [`BridgeError::TransportClosed`] if the peer is gone, otherwise
/// [`BridgeError::Io`].  Success means every byte was accepted.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    trace!("write frame {}", hex_dump(frame));
    let result = async {
        writer.write_all(frame).await?;
        writer.flush().await
    }
    .await;

    result.map_err(|e| {
        if is_disconnect(&e) {
            BridgeError::TransportClosed { received: 0 }
        } else {
            e.into()
        }
    })
}

/// Formats the first bytes of `bytes` as space-separated hex.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = format!("({} bytes)", bytes.len());
    for b in bytes.iter().take(HEX_DUMP_LIMIT) {
        let _ = write!(out, " {b:02x}");
    }
    if bytes.len() > HEX_DUMP_LIMIT {
        out.push_str(" ..");
    }
    out
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
