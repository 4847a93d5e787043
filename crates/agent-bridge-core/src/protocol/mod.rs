//! Protocol module: agent framing, socket descriptors and handshake records.

pub mod frame;
pub mod handshake;
pub mod request_id;
pub mod socket_file;

pub use frame::{
    declared_length, encode_frame, FrameAccumulator, FrameError, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};
pub use handshake::{PeerCredentials, SocketCookie, COOKIE_SIZE, CREDENTIALS_SIZE};
pub use request_id::RequestIdGenerator;
pub use socket_file::{DescriptorError, SocketDescriptor, SOCKET_MARKER};
