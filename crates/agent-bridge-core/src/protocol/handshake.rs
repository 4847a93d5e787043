//! Records exchanged during the emulated Unix-socket handshake.
//!
//! Cygwin and MSYS emulate `AF_UNIX` sockets with a loopback TCP socket.  A
//! client proves it is allowed to use the socket by sending a 16-byte cookie
//! (read from the socket's descriptor file) and then a 12-byte credential
//! record.  The server echoes a record of the same size after each step.
//!
//! # Byte order
//!
//! Both records are sent in the machine's native order, which is
//! little-endian on every platform these environments run on.  This is the
//! opposite of the SSH agent length prefix (big-endian), so the two must never
//! share a helper.

use std::fmt;

/// Size of the cookie record on the wire.
pub const COOKIE_SIZE: usize = 16;

/// Size of the credential record on the wire.
pub const CREDENTIALS_SIZE: usize = 12;

/// The 128-bit secret that authenticates a TCP connection as a Unix socket.
///
/// Stored as the four 32-bit groups printed in the descriptor file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketCookie(pub [u32; 4]);

impl SocketCookie {
    /// Serializes the cookie as four little-endian `u32` groups.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use agent_bridge_core::SocketCookie;
    ///
    /// let cookie = SocketCookie([0x01020304, 0, 0, 0]);
    /// assert_eq!(&cookie.to_bytes()[..4], &[0x04, 0x03, 0x02, 0x01]);
    /// ```
    pub fn to_bytes(&self) -> [u8; COOKIE_SIZE] {
        let mut out = [0u8; COOKIE_SIZE];
        for (chunk, group) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&group.to_le_bytes());
        }
        out
    }

    /// Parses a cookie from its 16-byte wire form.
    pub fn from_bytes(bytes: &[u8; COOKIE_SIZE]) -> Self {
        let mut groups = [0u32; 4];
        for (group, chunk) in groups.iter_mut().zip(bytes.chunks_exact(4)) {
            *group = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(groups)
    }
}

impl fmt::Display for SocketCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a:08x}-{b:08x}-{c:08x}-{d:08x}")
    }
}

// The cookie is a credential; keep it out of `{:?}` output.
impl fmt::Debug for SocketCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SocketCookie(..)")
    }
}

/// Process credentials sent after the cookie.
///
/// On Windows there is no uid/gid, so the bridge always sends zeros for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

impl PeerCredentials {
    /// Credentials for the current process: real pid, zero uid and gid.
    pub fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            uid: 0,
            gid: 0,
        }
    }

    /// Serializes the record as three little-endian `u32` fields.
    pub fn to_bytes(&self) -> [u8; CREDENTIALS_SIZE] {
        let mut out = [0u8; CREDENTIALS_SIZE];
        out[0..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..8].copy_from_slice(&self.uid.to_le_bytes());
        out[8..12].copy_from_slice(&self.gid.to_le_bytes());
        out
    }

    /// Parses a record from its 12-byte wire form.
    pub fn from_bytes(bytes: &[u8; CREDENTIALS_SIZE]) -> Self {
        let field = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Self {
            pid: field(0),
            uid: field(4),
            gid: field(8),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_bytes_are_little_endian_per_group() {
        // Arrange
        let cookie = SocketCookie([0x01020304, 0x05060708, 0x090a0b0c, 0x0d0e0f10]);

        // Act
        let bytes = cookie.to_bytes();

        // Assert
        assert_eq!(
            bytes,
            [
                0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05, 0x0c, 0x0b, 0x0a, 0x09, 0x10,
                0x0f, 0x0e, 0x0d
            ]
        );
    }

    #[test]
    fn test_cookie_from_bytes_inverts_to_bytes() {
        let cookie = SocketCookie([0xdeadbeef, 0, 0xffffffff, 42]);
        assert_eq!(SocketCookie::from_bytes(&cookie.to_bytes()), cookie);
    }

    #[test]
    fn test_cookie_display_matches_descriptor_format() {
        let cookie = SocketCookie([0x1, 0xab, 0x0, 0xffffffff]);
        assert_eq!(cookie.to_string(), "00000001-000000ab-00000000-ffffffff");
    }

    #[test]
    fn test_cookie_debug_does_not_leak_value() {
        let cookie = SocketCookie([0x11111111; 4]);
        let debug = format!("{cookie:?}");
        assert!(!debug.contains("11111111"), "Debug output must not expose the cookie");
    }

    #[test]
    fn test_credentials_layout() {
        // Arrange
        let creds = PeerCredentials {
            pid: 0x0000_1234,
            uid: 0,
            gid: 0,
        };

        // Act
        let bytes = creds.to_bytes();

        // Assert: pid first, little-endian, then two zero fields
        assert_eq!(bytes, [0x34, 0x12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_credentials_round_trip() {
        let creds = PeerCredentials {
            pid: 7,
            uid: 1000,
            gid: 513,
        };
        assert_eq!(PeerCredentials::from_bytes(&creds.to_bytes()), creds);
    }

    #[test]
    fn test_current_process_credentials_use_real_pid_and_zero_ids() {
        let creds = PeerCredentials::for_current_process();
        assert_eq!(creds.pid, std::process::id());
        assert_eq!(creds.uid, 0);
        assert_eq!(creds.gid, 0);
    }
}
