//! Transport-layer message protocol of a socket-based network interface for
//!  a distributed-filesystem network stack. Two peers exchange a handshake
//!  and then typed, framed messages over a byte stream. The socket I/O
//!  itself, connection scheduling and buffer allocation policy live in the
//!  surrounding driver; this crate owns the frames, the handshake and the
//!  acknowledgment bookkeeping of zero-copy payloads.
//!
//! ## Design goals
//!
//! * Speak all three wire dialects that evolved over time:
//!   * **V1**: a bare network-message header is the entire frame header,
//!     there are no standalone acknowledgments
//!   * **V2**: a fixed message header (type, checksum, two 64-bit cookies)
//!     in front of every frame, plus acknowledgment-only frames
//!   * **V3**: V2 framing plus coalescing of multiple acknowledgment
//!     cookies into one frame on dedicated ACK connections
//! * Negotiate the dialect from the first bytes on the wire: the V1 layout
//!   overlays magic and version on the destination-node-id field of its
//!   header, so one probe distinguishes all dialects
//! * Interoperate with foreign-endian peers: a byte-swapped magic flips a
//!   per-connection transform applied to every subsequent scalar
//! * Avoid dedicated acknowledgment frames where possible: a zero-copy
//!   acknowledgment cookie is piggybacked onto traffic that is queued
//!   anyway, and on V3 ACK connections several cookies coalesce into a
//!   discrete pair or a contiguous range
//!
//! ## Handshake
//!
//! V2/V3 layout, all scalars little-endian:
//! ```ascii
//! 0:  magic (u32)
//! 4:  version major (u16), version minor (u16)
//! 8:  source node id (u64)
//! 16: destination node id (u64)
//! 24: source process id (u32)
//! 28: destination process id (u32)
//! 32: source incarnation (u64) - per-boot counter used to detect restarts
//! 40: destination incarnation (u64)
//! 48: connection class (u32)
//! 52: interface count (u32)
//! 56: interface addresses (u32 each), sent as a second write
//! ```
//!
//! V1 layout (legacy network-message header, magic/version overlaid on the
//!  destination node id):
//! ```ascii
//! 0:  magic (u32), version major (u16), version minor (u16)
//! 8:  source node id (u64)
//! 16: destination process id (u32)
//! 20: source process id (u32)
//! 24: message kind (u32) - must be HELLO
//! 28: payload length (u32) - the interface count is this divided by 4
//! 32: connection class (u32), in the legacy hello-type slot
//! 36: interface addresses (u32 each)
//! ```
//!
//! ## Frames
//!
//! V2/V3 message header:
//! ```ascii
//! 0:  message type (u32) - Data or AckOnly
//! 4:  checksum (u32) - written just before the socket write, because a
//!      queued frame's cookies may still change; zero means unchecksummed
//! 8:  cookie 0 (u64)
//! 16: cookie 1 (u64)
//! 24: Data only: embedded network-message header, then the payload
//! ```
//!
//! An AckOnly frame is the strict 24-byte prefix. On a Data frame cookie 0
//!  announces the frame's own zero-copy payload and cookie 1 carries at most
//!  one piggybacked acknowledgment. On an AckOnly frame the pair encodes its
//!  shape in the relative field order, see [`message::ZcCookies`]:
//! ```ascii
//! (0, c)            exactly one cookie c
//! (a, b) with a > b two discrete cookies, at most 2 apart
//! (a, b) with a < b the inclusive range a..b
//! ```
//!
//! V1 frames are bare network-message headers plus payload; on receive they
//!  are normalized to ACK-less Data frames so everything downstream is
//!  version-agnostic.
//!
//! ## Concurrency
//!
//! Everything here is synchronous and lock-scoped: each connection's send
//!  queue, carrier position and cookie state form one owned struct behind a
//!  mutex, and nothing blocks while holding it. Standalone ACK frames are
//!  taken from a bounded pool before any lock is entered. The peer registry
//!  is a read-mostly table spanning all peers.

pub mod buf;
pub mod config;
pub mod conn;
pub mod error;
pub mod hello;
pub mod message;
pub mod peer;
pub mod pool;
pub mod protocol;
pub mod sock;
pub mod tx;
pub mod wire;
