use bytes::{BufMut, BytesMut};
use crc::Crc;
use tracing::debug;

use crate::buf::ScalarReader;
use crate::error::ProtocolError;
use crate::wire::{MsgType, NetMsgKind};

/// Header of the network-layer message embedded in every Data frame. On V1
///  connections this is the entire wire header of a frame; the first eight
///  bytes (`dst_node`) double as the magic/version probe slot during the
///  handshake.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct NetMessageHeader {
    pub dst_node: u64,
    pub src_node: u64,
    pub dst_process: u32,
    pub src_process: u32,
    pub kind: NetMsgKind,
    pub payload_len: u32,
}

impl NetMessageHeader {
    pub const SERIALIZED_LEN: usize = 2 * size_of::<u64>() + 4 * size_of::<u32>();

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.dst_node);
        buf.put_u64_le(self.src_node);
        buf.put_u32_le(self.dst_process);
        buf.put_u32_le(self.src_process);
        buf.put_u32_le(self.kind as u32);
        buf.put_u32_le(self.payload_len);
    }

    pub fn deser(buf: &mut impl bytes::Buf, flip: bool) -> Result<NetMessageHeader, ProtocolError> {
        let r = ScalarReader { flip };

        let dst_node = r.u64(buf)?;
        let src_node = r.u64(buf)?;
        let dst_process = r.u32(buf)?;
        let src_process = r.u32(buf)?;
        let raw_kind = r.u32(buf)?;
        let payload_len = r.u32(buf)?;

        let kind = NetMsgKind::try_from(raw_kind)
            .map_err(|_| ProtocolError::BadMessageType { kind: raw_kind })?;

        Ok(NetMessageHeader {
            dst_node,
            src_node,
            dst_process,
            src_process,
            kind,
            payload_len,
        })
    }
}

/// Fixed frame header of V2/V3 connections. The checksum is written as zero
///  at pack time and filled in by [`finalize_checksum`] immediately before
///  the socket write, because a late piggyback may still mutate the cookie
///  pair of a queued frame.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct MessageHeader {
    pub msg_type: MsgType,
    pub checksum: u32,
    pub cookie0: u64,
    pub cookie1: u64,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = 2 * size_of::<u32>() + 2 * size_of::<u64>();
    const CHECKSUM_OFFSET: usize = size_of::<u32>();

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.msg_type as u32);
        buf.put_u32_le(self.checksum);
        buf.put_u64_le(self.cookie0);
        buf.put_u64_le(self.cookie1);
    }

    pub fn deser(buf: &mut impl bytes::Buf, flip: bool) -> Result<MessageHeader, ProtocolError> {
        let r = ScalarReader { flip };

        let raw_type = r.u32(buf)?;
        let checksum = r.u32(buf)?;
        let cookie0 = r.u64(buf)?;
        let cookie1 = r.u64(buf)?;

        let msg_type = MsgType::try_from(raw_type)
            .map_err(|_| ProtocolError::BadMessageType { kind: raw_type })?;

        Ok(MessageHeader {
            msg_type,
            checksum,
            cookie0,
            cookie1,
        })
    }
}

/// The acknowledgment state carried in a frame's two cookie fields. The wire
///  encodes the shape in the relative magnitude of the pair; all coalescing
///  logic works on this tagged form and only the codec touches field order.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ZcCookies {
    Empty,
    /// Exactly one acknowledged buffer.
    Single(u64),
    /// Two discrete acknowledged buffers, larger value first, at most 2 apart.
    Discrete(u64, u64),
    /// Every buffer in the inclusive interval is acknowledged.
    Range(u64, u64),
}

impl ZcCookies {
    pub fn to_wire(self) -> (u64, u64) {
        match self {
            ZcCookies::Empty => (0, 0),
            ZcCookies::Single(c) => (0, c),
            ZcCookies::Discrete(hi, lo) => (hi, lo),
            ZcCookies::Range(lo, hi) => (lo, hi),
        }
    }

    pub fn from_wire(cookie0: u64, cookie1: u64) -> ZcCookies {
        if cookie0 == 0 && cookie1 == 0 {
            ZcCookies::Empty
        }
        else if cookie0 == 0 {
            ZcCookies::Single(cookie1)
        }
        else if cookie0 > cookie1 {
            ZcCookies::Discrete(cookie0, cookie1)
        }
        else if cookie0 < cookie1 {
            ZcCookies::Range(cookie0, cookie1)
        }
        else {
            // equal non-zero fields carry a single distinct value
            ZcCookies::Single(cookie1)
        }
    }

    /// Number of acknowledged buffer identifiers this pair represents.
    pub fn count(self) -> u64 {
        match self {
            ZcCookies::Empty => 0,
            ZcCookies::Single(_) => 1,
            ZcCookies::Discrete(_, _) => 2,
            ZcCookies::Range(lo, hi) => hi - lo + 1,
        }
    }

    /// The pair as passed to the buffer registry: a buffer matches if its
    ///  cookie equals either bound or lies strictly between them.
    pub fn release_bounds(self) -> (u64, u64) {
        match self {
            ZcCookies::Empty => (0, 0),
            ZcCookies::Single(c) => (c, c),
            ZcCookies::Discrete(hi, lo) => (hi, lo),
            ZcCookies::Range(lo, hi) => (lo, hi),
        }
    }
}

fn checksum_of(frame: &[u8]) -> u32 {
    let hasher = Crc::<u32>::new(&crc::CRC_32_ISCSI);
    let mut digest = hasher.digest();
    digest.update(&frame[..MessageHeader::CHECKSUM_OFFSET]);
    digest.update(&[0u8; size_of::<u32>()]);
    digest.update(&frame[MessageHeader::CHECKSUM_OFFSET + size_of::<u32>()..]);
    digest.finalize()
}

/// Computes the checksum over a packed V2/V3 frame and writes it into the
///  header in place. Must be called after the last possible cookie mutation,
///  i.e. once the frame has been taken off the send queue.
pub fn finalize_checksum(frame: &mut [u8]) {
    assert!(frame.len() >= MessageHeader::SERIALIZED_LEN);

    let checksum = checksum_of(frame);
    let offset = MessageHeader::CHECKSUM_OFFSET;
    frame[offset..offset + size_of::<u32>()].copy_from_slice(&checksum.to_le_bytes());
}

/// Verifies a received V2/V3 frame against its embedded checksum. A zero
///  checksum field means the sender did not checksum the frame, which is
///  accepted.
pub fn verify_checksum(frame: &[u8], flip: bool) -> bool {
    if frame.len() < MessageHeader::SERIALIZED_LEN {
        return false;
    }

    let offset = MessageHeader::CHECKSUM_OFFSET;
    let mut raw = [0u8; size_of::<u32>()];
    raw.copy_from_slice(&frame[offset..offset + size_of::<u32>()]);
    let mut received = u32::from_le_bytes(raw);
    if flip {
        received = received.swap_bytes();
    }

    if received == 0 {
        return true;
    }

    // the checksum is computed over the sender's byte stream, so the raw
    //  received bytes are hashed without any flip transform
    let computed = checksum_of(frame);
    if computed != received {
        debug!("checksum mismatch: computed {:08x}, received {:08x}", computed, received);
        return false;
    }
    true
}
