//! SSH agent wire framing.
//!
//! Wire format:
//! ```text
//! [length:4][payload:length]
//! ```
//! The length is a big-endian `u32` that counts only the payload.  The prefix
//! travels *with* the message everywhere in the bridge: a frame is always the
//! full `4 + length` byte sequence, never the bare payload.
//!
//! # Why an accumulator? (for beginners)
//!
//! Pipes and TCP sockets are byte streams.  A single `read()` may return one
//! byte of a frame, or the whole frame, or anything in between.  The
//! [`FrameAccumulator`] is fed whatever each read produced and reports how
//! many more bytes it needs.  It never asks for bytes beyond the end of the
//! current frame, so the next frame stays untouched in the stream.
//!
//! The size limit is checked the moment the 4-byte prefix is known, before
//! any payload is buffered, so a hostile length such as `0xFFFF_FFFF` never
//! causes a large allocation.

use thiserror::Error;

/// Size of the big-endian length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a whole frame (prefix included).
///
/// 256 KiB matches the message limit of the OpenSSH agent.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 262_144;

/// Errors produced while assembling or building frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The declared frame (prefix + payload) is larger than the configured limit.
    #[error("frame of {total} bytes exceeds the {max}-byte limit")]
    TooLarge { total: usize, max: usize },

    /// Fewer bytes are available than the frame requires.
    #[error("incomplete frame: need {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },
}

/// Reads the declared payload length from the first four bytes of `bytes`.
///
/// Returns `None` while fewer than four bytes are available.
///
/// # Examples
///
/// ```rust
/// use agent_bridge_core::protocol::declared_length;
///
/// assert_eq!(declared_length(&[0, 0, 0, 2, 0xAB, 0xCD]), Some(2));
/// assert_eq!(declared_length(&[0, 0]), None);
/// ```
pub fn declared_length(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Total on-wire size of a frame whose prefix declares `length` payload bytes.
pub fn frame_len(length: u32) -> usize {
    LENGTH_PREFIX_SIZE + length as usize
}

/// Builds a frame by prepending the big-endian length of `payload`.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the resulting frame would exceed
/// `max_frame_size` (or cannot be described by a 32-bit prefix at all).
///
/// # Examples
///
/// ```rust
/// use agent_bridge_core::protocol::encode_frame;
///
/// let frame = encode_frame(&[0xAB, 0xCD], 1024).unwrap();
/// assert_eq!(frame, vec![0, 0, 0, 2, 0xAB, 0xCD]);
/// ```
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
    let total = LENGTH_PREFIX_SIZE + payload.len();
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        total,
        max: max_frame_size,
    })?;
    if total > max_frame_size {
        return Err(FrameError::TooLarge {
            total,
            max: max_frame_size,
        });
    }

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Returns the payload of a complete frame (the bytes after the prefix).
///
/// # Errors
///
/// Returns [`FrameError::Incomplete`] if `frame` is shorter than its prefix
/// claims.
pub fn frame_payload(frame: &[u8]) -> Result<&[u8], FrameError> {
    let length = declared_length(frame).ok_or(FrameError::Incomplete {
        needed: LENGTH_PREFIX_SIZE,
        available: frame.len(),
    })?;
    let total = frame_len(length);
    frame
        .get(LENGTH_PREFIX_SIZE..total)
        .ok_or(FrameError::Incomplete {
            needed: total,
            available: frame.len(),
        })
}

// ── Accumulator ───────────────────────────────────────────────────────────────

/// Collects the bytes of exactly one frame across any number of partial reads.
///
/// # Examples
///
/// ```rust
/// use agent_bridge_core::FrameAccumulator;
///
/// let mut acc = FrameAccumulator::new(1024);
/// assert_eq!(acc.missing(), 4);
///
/// acc.push(&[0, 0, 0, 2, 0xAB]).unwrap();
/// assert_eq!(acc.missing(), 1);
///
/// acc.push(&[0xCD]).unwrap();
/// assert!(acc.is_complete());
/// assert_eq!(acc.into_frame().unwrap(), vec![0, 0, 0, 2, 0xAB, 0xCD]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    /// Bytes received so far, prefix included.
    buf: Vec<u8>,
    /// Upper bound for `4 + declared_length`.
    max_frame_size: usize,
    /// Total frame size, known once the prefix has arrived.
    expected_total: Option<usize>,
}

impl FrameAccumulator {
    /// Creates an empty accumulator that rejects frames larger than
    /// `max_frame_size` bytes (prefix included).
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(LENGTH_PREFIX_SIZE),
            max_frame_size,
            expected_total: None,
        }
    }

    /// Number of bytes still needed to complete the current stage.
    ///
    /// Before the prefix is known this is the number of missing prefix bytes;
    /// afterwards it is the number of missing payload bytes.  Zero means the
    /// frame is complete.
    pub fn missing(&self) -> usize {
        match self.expected_total {
            Some(total) => total - self.buf.len(),
            None => LENGTH_PREFIX_SIZE - self.buf.len(),
        }
    }

    /// Number of bytes received so far.
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// `true` once the prefix is known and the whole payload has arrived.
    pub fn is_complete(&self) -> bool {
        self.expected_total == Some(self.buf.len())
    }

    /// Total frame size declared by the prefix, if the prefix has arrived.
    pub fn expected_total(&self) -> Option<usize> {
        self.expected_total
    }

    /// Appends bytes from `chunk` and returns how many were consumed.
    ///
    /// Consumption stops at the end of the frame; any surplus belongs to the
    /// next frame and is left for the caller.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] as soon as the prefix declares a frame
    /// larger than the limit.  The accumulator must be discarded afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<usize, FrameError> {
        let mut consumed = 0;

        while consumed < chunk.len() && !self.is_complete() {
            let take = self.missing().min(chunk.len() - consumed);
            self.buf.extend_from_slice(&chunk[consumed..consumed + take]);
            consumed += take;

            if self.expected_total.is_none() {
                if let Some(length) = declared_length(&self.buf) {
                    let total = frame_len(length);
                    if total > self.max_frame_size {
                        return Err(FrameError::TooLarge {
                            total,
                            max: self.max_frame_size,
                        });
                    }
                    // Bounded by `max_frame_size`, checked just above.
                    self.buf.reserve_exact(total - self.buf.len());
                    self.expected_total = Some(total);
                }
            }
        }

        Ok(consumed)
    }

    /// Consumes the accumulator and returns the complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Incomplete`] if the frame has not fully arrived.
    pub fn into_frame(self) -> Result<Vec<u8>, FrameError> {
        if self.is_complete() {
            Ok(self.buf)
        } else {
            Err(FrameError::Incomplete {
                needed: self.expected_total.unwrap_or(LENGTH_PREFIX_SIZE),
                available: self.buf.len(),
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_length_reads_big_endian_prefix() {
        assert_eq!(declared_length(&[0x00, 0x00, 0x01, 0x02]), Some(258));
    }

    #[test]
    fn test_declared_length_needs_four_bytes() {
        assert_eq!(declared_length(&[0x00, 0x00, 0x01]), None);
        assert_eq!(declared_length(&[]), None);
    }

    #[test]
    fn test_encode_frame_prepends_length() {
        // Arrange / Act
        let frame = encode_frame(&[0xEF, 0x01], 64).unwrap();

        // Assert
        assert_eq!(frame, vec![0x00, 0x00, 0x00, 0x02, 0xEF, 0x01]);
    }

    #[test]
    fn test_encode_frame_empty_payload_is_bare_prefix() {
        assert_eq!(encode_frame(&[], 64).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_frame_rejects_oversized_payload() {
        let result = encode_frame(&[0u8; 61], 64);
        assert_eq!(result, Err(FrameError::TooLarge { total: 65, max: 64 }));
    }

    #[test]
    fn test_frame_payload_strips_prefix() {
        let frame = [0, 0, 0, 2, 0xAB, 0xCD];
        assert_eq!(frame_payload(&frame).unwrap(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_frame_payload_of_truncated_frame_is_incomplete() {
        let frame = [0, 0, 0, 3, 0xAB];
        assert_eq!(
            frame_payload(&frame),
            Err(FrameError::Incomplete {
                needed: 7,
                available: 5
            })
        );
    }

    #[test]
    fn test_accumulator_starts_by_asking_for_prefix() {
        let acc = FrameAccumulator::new(1024);
        assert_eq!(acc.missing(), LENGTH_PREFIX_SIZE);
        assert_eq!(acc.received(), 0);
        assert!(!acc.is_complete());
    }

    #[test]
    fn test_accumulator_split_prefix() {
        // Arrange
        let mut acc = FrameAccumulator::new(1024);

        // Act: two prefix bytes, then the rest
        acc.push(&[0x00, 0x00]).unwrap();
        assert_eq!(acc.missing(), 2);
        assert_eq!(acc.expected_total(), None);
        acc.push(&[0x00, 0x02]).unwrap();

        // Assert: the prefix is now known and two payload bytes are missing
        assert_eq!(acc.expected_total(), Some(6));
        assert_eq!(acc.missing(), 2);
    }

    #[test]
    fn test_accumulator_zero_length_frame_completes_after_prefix() {
        let mut acc = FrameAccumulator::new(1024);
        acc.push(&[0, 0, 0, 0]).unwrap();
        assert!(acc.is_complete());
        assert_eq!(acc.into_frame().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_accumulator_leaves_surplus_bytes_unconsumed() {
        // Arrange: one full frame followed by the start of the next one
        let mut acc = FrameAccumulator::new(1024);
        let bytes = [0, 0, 0, 1, 0x0B, 0, 0, 0, 9];

        // Act
        let consumed = acc.push(&bytes).unwrap();

        // Assert
        assert_eq!(consumed, 5);
        assert!(acc.is_complete());
        assert_eq!(acc.into_frame().unwrap(), vec![0, 0, 0, 1, 0x0B]);
    }

    #[test]
    fn test_accumulator_rejects_oversized_frame_at_prefix() {
        // Arrange: limit of 16 bytes, prefix declares 13 payload bytes (17 total)
        let mut acc = FrameAccumulator::new(16);

        // Act
        let result = acc.push(&[0, 0, 0, 13]);

        // Assert: rejected before any payload is seen
        assert_eq!(result, Err(FrameError::TooLarge { total: 17, max: 16 }));
    }

    #[test]
    fn test_accumulator_accepts_frame_exactly_at_limit() {
        let mut acc = FrameAccumulator::new(16);
        acc.push(&[0, 0, 0, 12]).unwrap();
        acc.push(&[7u8; 12]).unwrap();
        assert!(acc.is_complete());
    }

    #[test]
    fn test_accumulator_huge_declared_length_is_rejected() {
        let mut acc = FrameAccumulator::new(DEFAULT_MAX_FRAME_SIZE);
        let result = acc.push(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_into_frame_before_completion_is_incomplete() {
        let mut acc = FrameAccumulator::new(1024);
        acc.push(&[0, 0, 0, 4, 1]).unwrap();
        assert_eq!(
            acc.into_frame(),
            Err(FrameError::Incomplete {
                needed: 8,
                available: 5
            })
        );
    }

    #[test]
    fn test_push_after_completion_consumes_nothing() {
        let mut acc = FrameAccumulator::new(1024);
        acc.push(&[0, 0, 0, 0]).unwrap();
        assert_eq!(acc.push(&[1, 2, 3]).unwrap(), 0);
    }
}
