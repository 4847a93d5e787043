//! Parser for Cygwin/MSYS `!<socket >` descriptor files.
//!
//! An emulated Unix socket is a small regular file whose content advertises
//! where the real (TCP) socket lives:
//!
//! ```text
//! !<socket >12345 s 01020304-05060708-090a0b0c-0d0e0f10
//! ^ marker  ^port ^type ^cookie (four 32-bit hex groups)
//! ```
//!
//! The type tag is `s` for stream sockets and `d` for datagram sockets; it is
//! recorded but not otherwise interpreted by the bridge.

use thiserror::Error;
use tracing::trace;

use crate::protocol::handshake::SocketCookie;

/// Literal prefix of every descriptor file.
pub const SOCKET_MARKER: &[u8] = b"!<socket >";

/// Maximum number of descriptor bytes that are read and parsed.
pub const MAX_DESCRIPTOR_LEN: usize = 127;

/// Errors produced while parsing a descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// The content does not begin with `!<socket >`.
    #[error("descriptor does not start with the `!<socket >` marker")]
    MissingMarker,

    /// The content after the marker is not valid UTF-8 text.
    #[error("descriptor is not valid text")]
    NotText,

    /// A required field is absent.
    #[error("descriptor is missing the {0} field")]
    MissingField(&'static str),

    /// The port is not a decimal number in `0..=65535`.
    #[error("invalid port `{0}`")]
    InvalidPort(String),

    /// The type tag is not exactly one character.
    #[error("invalid socket type `{0}`")]
    InvalidType(String),

    /// The cookie is not four hyphen-separated groups of up to 8 hex digits.
    ///
    /// The offending text is deliberately not included: it is a secret.
    #[error("malformed cookie")]
    InvalidCookie,
}

/// Parsed content of a descriptor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketDescriptor {
    /// Loopback TCP port of the emulated socket.
    pub port: u16,
    /// One-character transport tag (`s` = stream, `d` = datagram).
    pub socket_type: char,
    /// Secret to present during the handshake.
    pub cookie: SocketCookie,
}

impl SocketDescriptor {
    /// Parses raw descriptor bytes.
    ///
    /// Trailing NUL bytes and whitespace are ignored, as are any tokens after
    /// the cookie.
    ///
    /// # Errors
    ///
    /// Returns a [`DescriptorError`] describing the first problem found.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use agent_bridge_core::SocketDescriptor;
    ///
    /// let desc = SocketDescriptor::parse(
    ///     b"!<socket >12345 s 01020304-05060708-090a0b0c-0d0e0f10",
    /// )
    /// .unwrap();
    /// assert_eq!(desc.port, 12345);
    /// assert_eq!(desc.socket_type, 's');
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let rest = bytes
            .strip_prefix(SOCKET_MARKER)
            .ok_or(DescriptorError::MissingMarker)?;
        let text = std::str::from_utf8(rest).map_err(|_| DescriptorError::NotText)?;
        let text = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());

        let mut fields = text.split_whitespace();

        let port_text = fields.next().ok_or(DescriptorError::MissingField("port"))?;
        let port = port_text
            .parse::<u16>()
            .map_err(|_| DescriptorError::InvalidPort(port_text.to_string()))?;

        let type_text = fields.next().ok_or(DescriptorError::MissingField("type"))?;
        let mut type_chars = type_text.chars();
        let socket_type = match (type_chars.next(), type_chars.next()) {
            (Some(c), None) => c,
            _ => return Err(DescriptorError::InvalidType(type_text.to_string())),
        };

        let cookie_text = fields.next().ok_or(DescriptorError::MissingField("cookie"))?;
        let cookie = parse_cookie(cookie_text)?;

        if fields.next().is_some() {
            trace!("ignoring trailing tokens in socket descriptor");
        }

        Ok(Self {
            port,
            socket_type,
            cookie,
        })
    }

    /// `true` if the descriptor advertises a stream socket.
    pub fn is_stream(&self) -> bool {
        self.socket_type == 's'
    }
}

fn parse_cookie(text: &str) -> Result<SocketCookie, DescriptorError> {
    let mut groups = [0u32; 4];
    let mut parts = text.split('-');

    for group in groups.iter_mut() {
        let part = parts.next().ok_or(DescriptorError::InvalidCookie)?;
        if part.is_empty() || part.len() > 8 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DescriptorError::InvalidCookie);
        }
        *group = u32::from_str_radix(part, 16).map_err(|_| DescriptorError::InvalidCookie)?;
    }

    if parts.next().is_some() {
        return Err(DescriptorError::InvalidCookie);
    }
    Ok(SocketCookie(groups))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &[u8] = b"!<socket >12345 s 01020304-05060708-090a0b0c-0d0e0f10";

    #[test]
    fn test_parse_well_formed_descriptor() {
        // Arrange / Act
        let desc = SocketDescriptor::parse(WELL_FORMED).unwrap();

        // Assert
        assert_eq!(desc.port, 12345);
        assert_eq!(desc.socket_type, 's');
        assert!(desc.is_stream());
        assert_eq!(
            desc.cookie,
            SocketCookie([0x01020304, 0x05060708, 0x090a0b0c, 0x0d0e0f10])
        );
    }

    #[test]
    fn test_parse_ignores_trailing_nul_and_newline() {
        let mut bytes = WELL_FORMED.to_vec();
        bytes.extend_from_slice(b"\n\0\0");
        assert_eq!(SocketDescriptor::parse(&bytes).unwrap().port, 12345);
    }

    #[test]
    fn test_parse_datagram_type_is_recorded() {
        let desc =
            SocketDescriptor::parse(b"!<socket >80 d 00000000-00000000-00000000-00000001").unwrap();
        assert_eq!(desc.socket_type, 'd');
        assert!(!desc.is_stream());
    }

    #[test]
    fn test_parse_accepts_short_hex_groups() {
        let desc = SocketDescriptor::parse(b"!<socket >1 s 1-a-FF-0").unwrap();
        assert_eq!(desc.cookie, SocketCookie([0x1, 0xa, 0xff, 0x0]));
    }

    #[test]
    fn test_parse_without_marker_is_rejected() {
        let result = SocketDescriptor::parse(b"12345 s 01020304-05060708-090a0b0c-0d0e0f10");
        assert_eq!(result, Err(DescriptorError::MissingMarker));
    }

    #[test]
    fn test_parse_marker_only_reports_missing_port() {
        let result = SocketDescriptor::parse(b"!<socket >");
        assert_eq!(result, Err(DescriptorError::MissingField("port")));
    }

    #[test]
    fn test_parse_port_out_of_range_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >70000 s 1-2-3-4");
        assert_eq!(result, Err(DescriptorError::InvalidPort("70000".to_string())));
    }

    #[test]
    fn test_parse_multi_character_type_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >22 stream 1-2-3-4");
        assert_eq!(result, Err(DescriptorError::InvalidType("stream".to_string())));
    }

    #[test]
    fn test_parse_cookie_with_three_groups_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >22 s 01020304-05060708-090a0b0c");
        assert_eq!(result, Err(DescriptorError::InvalidCookie));
    }

    #[test]
    fn test_parse_cookie_with_five_groups_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >22 s 1-2-3-4-5");
        assert_eq!(result, Err(DescriptorError::InvalidCookie));
    }

    #[test]
    fn test_parse_cookie_group_longer_than_eight_digits_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >22 s 101020304-0-0-0");
        assert_eq!(result, Err(DescriptorError::InvalidCookie));
    }

    #[test]
    fn test_parse_non_hex_cookie_is_rejected() {
        let result = SocketDescriptor::parse(b"!<socket >22 s zzzzzzzz-0-0-0");
        assert_eq!(result, Err(DescriptorError::InvalidCookie));
    }

    #[test]
    fn test_parse_missing_cookie_is_reported() {
        let result = SocketDescriptor::parse(b"!<socket >22 s");
        assert_eq!(result, Err(DescriptorError::MissingField("cookie")));
    }

    #[test]
    fn test_invalid_cookie_error_does_not_echo_secret() {
        let err = SocketDescriptor::parse(b"!<socket >22 s deadbeef-1-2").unwrap_err();
        assert!(!err.to_string().contains("deadbeef"));
    }
}
