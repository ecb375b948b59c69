use thiserror::Error;

/// Errors surfaced across the protocol's public entry points.
///
/// The handshake-time variants are fatal to the connection attempt; the
///  caller is expected to tear the connection down. Internal queue / carrier
///  inconsistencies are bugs in this crate and assert instead of returning
///  an error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unrecognized handshake magic {magic:#010x}")]
    BadMagic { magic: u32 },

    #[error("unexpected message kind {kind} in handshake")]
    BadMessageType { kind: u32 },

    #[error("handshake advertised unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("handshake advertised {count} interfaces, exceeding the supported maximum")]
    TooManyInterfaces { count: u32 },

    #[error("handshake interface address {index} is zero")]
    ZeroInterfaceAddress { index: usize },

    #[error("no spare frame for a standalone ACK")]
    OutOfMemory,

    #[error("ZC-ACK {cookie1}..{cookie2} released {released} buffers, expected {expected}")]
    Mismatch {
        cookie1: u64,
        cookie2: u64,
        expected: u64,
        released: u64,
    },

    #[error("frame truncated")]
    Truncated,

    #[error(transparent)]
    Socket(#[from] anyhow::Error),
}

impl From<bytes::TryGetError> for ProtocolError {
    fn from(_: bytes::TryGetError) -> Self {
        ProtocolError::Truncated
    }
}
