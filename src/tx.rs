use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::message::{MessageHeader, NetMessageHeader, ZcCookies};
use crate::wire::MsgType;

/// A message queued for transmission on a connection. Created when the
///  sender has data ready to go out, destroyed once the bytes are fully
///  written to the socket or on connection teardown.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TxMessage {
    pub msg_type: MsgType,

    /// Acknowledgment information riding on this frame. On a Data frame at
    ///  most a single piggybacked cookie; on an AckOnly frame of a V3 ACK
    ///  connection potentially a discrete pair or a range.
    pub zc_ack: ZcCookies,

    /// Data only: the cookie announcing this transfer's own pinned buffer,
    ///  zero if the payload is not sent zero-copy.
    pub zc_req_cookie: u64,

    /// The embedded network-layer header. Always present on Data frames,
    ///  never on AckOnly frames.
    pub net_header: Option<NetMessageHeader>,

    pub payload_len: u32,

    /// Whether this message must not wait behind bulk traffic, making it
    ///  eligible for a dedicated ACK-class connection.
    pub nonblocking: bool,
}

impl TxMessage {
    pub fn data(net_header: NetMessageHeader, zc_req_cookie: u64) -> TxMessage {
        TxMessage {
            msg_type: MsgType::Data,
            zc_ack: ZcCookies::Empty,
            zc_req_cookie,
            payload_len: net_header.payload_len,
            net_header: Some(net_header),
            nonblocking: false,
        }
    }

    pub fn ack_only(cookie: u64, nonblocking: bool) -> TxMessage {
        TxMessage {
            msg_type: MsgType::AckOnly,
            zc_ack: ZcCookies::Single(cookie),
            zc_req_cookie: 0,
            net_header: None,
            payload_len: 0,
            nonblocking,
        }
    }

    /// The one cookie a standalone ACK frame was created for.
    pub(crate) fn single_ack_cookie(&self) -> u64 {
        match self.zc_ack {
            ZcCookies::Single(c) => c,
            other => panic!("standalone ACK frame carries {:?} instead of a single cookie", other),
        }
    }

    fn wire_cookies(&self) -> (u64, u64) {
        match self.msg_type {
            MsgType::AckOnly => self.zc_ack.to_wire(),
            MsgType::Data => {
                // slot 0 belongs to this transfer's own ZC request, so only
                //  a single piggybacked cookie fits in slot 1
                let ack = match self.zc_ack {
                    ZcCookies::Empty => 0,
                    ZcCookies::Single(c) => c,
                    other => panic!("Data frame cannot carry {:?}", other),
                };
                (self.zc_req_cookie, ack)
            }
        }
    }
}

/// The wire-ready form of a message: the serialized header, plus the length
///  bookkeeping for the payload that the socket layer appends. The checksum
///  field is still zero, see [`crate::message::finalize_checksum`].
#[derive(Debug)]
pub struct PackedFrame {
    pub header: BytesMut,
    pub payload_len: u32,
    pub total_len: usize,
}

pub(crate) fn pack_v1(tx: &TxMessage) -> PackedFrame {
    assert_eq!(tx.msg_type, MsgType::Data, "V1 has no standalone ACK representation");

    let net_header = tx.net_header.as_ref()
        .expect("Data message without an embedded network header");

    let mut header = BytesMut::with_capacity(NetMessageHeader::SERIALIZED_LEN);
    net_header.ser(&mut header);

    PackedFrame {
        header,
        payload_len: tx.payload_len,
        total_len: NetMessageHeader::SERIALIZED_LEN + tx.payload_len as usize,
    }
}

pub(crate) fn pack_v2(tx: &TxMessage) -> PackedFrame {
    let (cookie0, cookie1) = tx.wire_cookies();

    let mut header = BytesMut::with_capacity(
        MessageHeader::SERIALIZED_LEN + NetMessageHeader::SERIALIZED_LEN);
    MessageHeader {
        msg_type: tx.msg_type,
        checksum: 0,
        cookie0,
        cookie1,
    }.ser(&mut header);

    match tx.msg_type {
        MsgType::Data => {
            let net_header = tx.net_header.as_ref()
                .expect("Data message without an embedded network header");
            net_header.ser(&mut header);

            PackedFrame {
                header,
                payload_len: tx.payload_len,
                total_len: MessageHeader::SERIALIZED_LEN
                    + NetMessageHeader::SERIALIZED_LEN
                    + tx.payload_len as usize,
            }
        }
        MsgType::AckOnly => {
            assert!(tx.net_header.is_none(), "ACK frame with an embedded network header");

            // strict prefix of the Data layout: the embedded header is cut off
            PackedFrame {
                header,
                payload_len: 0,
                total_len: MessageHeader::SERIALIZED_LEN,
            }
        }
    }
}

/// A received frame header in canonical in-memory form: version differences
///  are normalized away so downstream logic never branches on the dialect.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct RecvMessage {
    pub msg_type: MsgType,
    pub checksum: u32,
    pub cookie0: u64,
    pub cookie1: u64,
    pub net_header: Option<NetMessageHeader>,
}

/// V1 frames carry a bare network header. They are rewritten as if they were
///  ACK-less Data frames of the versioned layout.
pub(crate) fn unpack_v1(frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError> {
    let mut buf = frame;
    let net_header = NetMessageHeader::deser(&mut buf, flip)?;

    Ok(RecvMessage {
        msg_type: MsgType::Data,
        checksum: 0,
        cookie0: 0,
        cookie1: 0,
        net_header: Some(net_header),
    })
}

pub(crate) fn unpack_v2(frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError> {
    let mut buf = frame;
    let header = MessageHeader::deser(&mut buf, flip)?;

    let net_header = match header.msg_type {
        MsgType::Data => Some(NetMessageHeader::deser(&mut buf, flip)?),
        MsgType::AckOnly => None,
    };

    Ok(RecvMessage {
        msg_type: header.msg_type,
        checksum: header.checksum,
        cookie0: header.cookie0,
        cookie1: header.cookie1,
        net_header,
    })
}
