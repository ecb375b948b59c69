use std::time::Duration;

use crate::config::HelloTestHook;
use crate::conn::{Conn, ZcAckOutcome};
use crate::error::ProtocolError;
use crate::hello::{self, HelloMessage};
use crate::peer::{handle_zc_ack, handle_zc_request, NodeId, PeerTable, ZcBufferRegistry};
use crate::pool::TxPool;
use crate::sock::WireSocket;
use crate::tx::{self, PackedFrame, RecvMessage, TxMessage};
use crate::wire::{ConnClass, MsgType, ProtocolVersion};

/// How well a connection suits a message, as judged by the per-version
///  matching policy. `May` connections are a fallback when nothing answers
///  `Yes`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MatchResult {
    No,
    May,
    Yes,
}

/// The operations that differ between wire versions. Resolved once at
///  connection setup via [`for_version`] and cached on the connection, so
///  the hot paths never branch on the version again.
///
/// Receiving a handshake starts before the version is known; use
///  [`hello::recv_hello`], which probes the magic and then dispatches to
///  [`Protocol::recv_hello_body`].
pub trait Protocol: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    fn send_hello(
        &self,
        sock: &dyn WireSocket,
        msg: &HelloMessage,
        hook: Option<HelloTestHook>,
        timeout: Duration,
    ) -> Result<(), ProtocolError>;

    fn recv_hello_body(
        &self,
        sock: &dyn WireSocket,
        flip: bool,
        timeout: Duration,
    ) -> Result<HelloMessage, ProtocolError>;

    /// Lays out a message's wire header. The checksum stays zero until the
    ///  frame is finalized right before the socket write.
    fn pack(&self, tx: &TxMessage) -> PackedFrame;

    /// Normalizes a received frame header into the canonical in-memory form.
    fn unpack(&self, frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError>;

    /// Enqueues a Data message, possibly absorbing a queued standalone ACK
    ///  placeholder (returned for pooling).
    fn queue_tx_msg(&self, conn: &Conn, tx: TxMessage) -> Option<TxMessage>;

    /// Folds a ZC-ACK cookie into queued traffic. Not available on V1.
    fn queue_zcack(&self, conn: &Conn, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome;

    /// A peer asks us to acknowledge its zero-copy buffer. Not available on V1.
    fn handle_zc_request(
        &self,
        peers: &PeerTable,
        pool: &TxPool,
        peer: NodeId,
        cookie: u64,
        remote: bool,
    ) -> Result<(), ProtocolError>;

    /// A received frame carried an acknowledgment cookie pair. Not available on V1.
    fn handle_zc_ack(
        &self,
        registry: &dyn ZcBufferRegistry,
        cookie1: u64,
        cookie2: u64,
    ) -> Result<(), ProtocolError>;

    /// Whether a connection of the given class may carry this message.
    fn match_tx(&self, class: ConnClass, tx: &TxMessage) -> MatchResult;
}

struct ProtocolV1;
struct ProtocolV2;
struct ProtocolV3;

static PROTOCOL_V1: ProtocolV1 = ProtocolV1;
static PROTOCOL_V2: ProtocolV2 = ProtocolV2;
static PROTOCOL_V3: ProtocolV3 = ProtocolV3;

pub fn for_version(version: ProtocolVersion) -> &'static dyn Protocol {
    match version {
        ProtocolVersion::V1 => &PROTOCOL_V1,
        ProtocolVersion::V2 => &PROTOCOL_V2,
        ProtocolVersion::V3 => &PROTOCOL_V3,
    }
}

fn match_tx_common(class: ConnClass, tx: &TxMessage) -> MatchResult {
    match class {
        ConnClass::Any => MatchResult::May,
        ConnClass::Control | ConnClass::Ack => {
            if tx.payload_len == 0 {
                MatchResult::Yes
            }
            else {
                MatchResult::No
            }
        }
        ConnClass::BulkIn | ConnClass::BulkOut => {
            if tx.payload_len != 0 {
                MatchResult::Yes
            }
            else {
                MatchResult::May
            }
        }
    }
}

impl Protocol for ProtocolV1 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn send_hello(
        &self,
        sock: &dyn WireSocket,
        msg: &HelloMessage,
        hook: Option<HelloTestHook>,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        hello::send_hello(sock, msg, ProtocolVersion::V1, hook, timeout)
    }

    fn recv_hello_body(
        &self,
        sock: &dyn WireSocket,
        flip: bool,
        timeout: Duration,
    ) -> Result<HelloMessage, ProtocolError> {
        hello::read_hello_body(sock, ProtocolVersion::V1, flip, timeout)
    }

    fn pack(&self, tx: &TxMessage) -> PackedFrame {
        tx::pack_v1(tx)
    }

    fn unpack(&self, frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError> {
        tx::unpack_v1(frame, flip)
    }

    fn queue_tx_msg(&self, conn: &Conn, tx: TxMessage) -> Option<TxMessage> {
        assert_eq!(tx.msg_type, MsgType::Data, "V1 has no standalone ACK representation");
        conn.enqueue_fifo(tx);
        None
    }

    fn queue_zcack(&self, _conn: &Conn, _tx_ack: Option<TxMessage>, _cookie: u64) -> ZcAckOutcome {
        panic!("V1 connections cannot carry ZC-ACK cookies");
    }

    fn handle_zc_request(
        &self,
        _peers: &PeerTable,
        _pool: &TxPool,
        _peer: NodeId,
        _cookie: u64,
        _remote: bool,
    ) -> Result<(), ProtocolError> {
        panic!("V1 peers cannot request ZC acknowledgments");
    }

    fn handle_zc_ack(
        &self,
        _registry: &dyn ZcBufferRegistry,
        _cookie1: u64,
        _cookie2: u64,
    ) -> Result<(), ProtocolError> {
        panic!("V1 frames carry no cookie pair");
    }

    fn match_tx(&self, class: ConnClass, tx: &TxMessage) -> MatchResult {
        match_tx_common(class, tx)
    }
}

impl Protocol for ProtocolV2 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn send_hello(
        &self,
        sock: &dyn WireSocket,
        msg: &HelloMessage,
        hook: Option<HelloTestHook>,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        hello::send_hello(sock, msg, ProtocolVersion::V2, hook, timeout)
    }

    fn recv_hello_body(
        &self,
        sock: &dyn WireSocket,
        flip: bool,
        timeout: Duration,
    ) -> Result<HelloMessage, ProtocolError> {
        hello::read_hello_body(sock, ProtocolVersion::V2, flip, timeout)
    }

    fn pack(&self, tx: &TxMessage) -> PackedFrame {
        tx::pack_v2(tx)
    }

    fn unpack(&self, frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError> {
        tx::unpack_v2(frame, flip)
    }

    fn queue_tx_msg(&self, conn: &Conn, tx: TxMessage) -> Option<TxMessage> {
        conn.enqueue_data_v2(tx)
    }

    fn queue_zcack(&self, conn: &Conn, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        conn.queue_zcack_v2(tx_ack, cookie)
    }

    fn handle_zc_request(
        &self,
        peers: &PeerTable,
        pool: &TxPool,
        peer: NodeId,
        cookie: u64,
        remote: bool,
    ) -> Result<(), ProtocolError> {
        handle_zc_request(peers, pool, peer, cookie, remote)
    }

    fn handle_zc_ack(
        &self,
        registry: &dyn ZcBufferRegistry,
        cookie1: u64,
        cookie2: u64,
    ) -> Result<(), ProtocolError> {
        handle_zc_ack(registry, ProtocolVersion::V2, cookie1, cookie2)
    }

    fn match_tx(&self, class: ConnClass, tx: &TxMessage) -> MatchResult {
        match_tx_common(class, tx)
    }
}

impl Protocol for ProtocolV3 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V3
    }

    fn send_hello(
        &self,
        sock: &dyn WireSocket,
        msg: &HelloMessage,
        hook: Option<HelloTestHook>,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        hello::send_hello(sock, msg, ProtocolVersion::V3, hook, timeout)
    }

    fn recv_hello_body(
        &self,
        sock: &dyn WireSocket,
        flip: bool,
        timeout: Duration,
    ) -> Result<HelloMessage, ProtocolError> {
        hello::read_hello_body(sock, ProtocolVersion::V3, flip, timeout)
    }

    fn pack(&self, tx: &TxMessage) -> PackedFrame {
        tx::pack_v2(tx)
    }

    fn unpack(&self, frame: &[u8], flip: bool) -> Result<RecvMessage, ProtocolError> {
        tx::unpack_v2(frame, flip)
    }

    fn queue_tx_msg(&self, conn: &Conn, tx: TxMessage) -> Option<TxMessage> {
        conn.enqueue_data_v2(tx)
    }

    fn queue_zcack(&self, conn: &Conn, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        conn.queue_zcack_v3(tx_ack, cookie)
    }

    fn handle_zc_request(
        &self,
        peers: &PeerTable,
        pool: &TxPool,
        peer: NodeId,
        cookie: u64,
        remote: bool,
    ) -> Result<(), ProtocolError> {
        handle_zc_request(peers, pool, peer, cookie, remote)
    }

    fn handle_zc_ack(
        &self,
        registry: &dyn ZcBufferRegistry,
        cookie1: u64,
        cookie2: u64,
    ) -> Result<(), ProtocolError> {
        handle_zc_ack(registry, ProtocolVersion::V3, cookie1, cookie2)
    }

    /// A non-blocking acknowledgment belongs on an ACK connection and
    ///  nowhere else; ACK connections take nothing but those.
    fn match_tx(&self, class: ConnClass, tx: &TxMessage) -> MatchResult {
        if tx.nonblocking && tx.msg_type == MsgType::AckOnly {
            return if class == ConnClass::Ack {
                MatchResult::Yes
            }
            else {
                MatchResult::No
            };
        }
        if class == ConnClass::Ack {
            return MatchResult::No;
        }
        match_tx_common(class, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NetMessageHeader;
    use crate::wire::NetMsgKind;
    use rstest::rstest;

    fn data_tx(payload_len: u32) -> TxMessage {
        TxMessage::data(
            NetMessageHeader {
                dst_node: 1,
                src_node: 2,
                dst_process: 3,
                src_process: 4,
                kind: NetMsgKind::Put,
                payload_len,
            },
            0,
        )
    }

    #[rstest]
    #[case(ProtocolVersion::V1)]
    #[case(ProtocolVersion::V2)]
    #[case(ProtocolVersion::V3)]
    fn test_for_version(#[case] version: ProtocolVersion) {
        assert_eq!(for_version(version).version(), version);
    }

    #[rstest]
    #[case::any_bulk(ConnClass::Any, data_tx(1000), MatchResult::May)]
    #[case::any_small(ConnClass::Any, data_tx(0), MatchResult::May)]
    #[case::control_small(ConnClass::Control, data_tx(0), MatchResult::Yes)]
    #[case::control_bulk(ConnClass::Control, data_tx(1000), MatchResult::No)]
    #[case::bulk_out_bulk(ConnClass::BulkOut, data_tx(1000), MatchResult::Yes)]
    #[case::bulk_out_small(ConnClass::BulkOut, data_tx(0), MatchResult::May)]
    #[case::bulk_in_bulk(ConnClass::BulkIn, data_tx(1000), MatchResult::Yes)]
    fn test_match_tx_v2(#[case] class: ConnClass, #[case] tx: TxMessage, #[case] expected: MatchResult) {
        assert_eq!(for_version(ProtocolVersion::V2).match_tx(class, &tx), expected);
        assert_eq!(for_version(ProtocolVersion::V1).match_tx(class, &tx), expected);
    }

    #[rstest]
    #[case::nonblk_ack_on_ack(ConnClass::Ack, TxMessage::ack_only(5, true), MatchResult::Yes)]
    #[case::nonblk_ack_on_any(ConnClass::Any, TxMessage::ack_only(5, true), MatchResult::No)]
    #[case::nonblk_ack_on_control(ConnClass::Control, TxMessage::ack_only(5, true), MatchResult::No)]
    #[case::blocking_ack_on_ack(ConnClass::Ack, TxMessage::ack_only(5, false), MatchResult::No)]
    #[case::blocking_ack_on_control(ConnClass::Control, TxMessage::ack_only(5, false), MatchResult::Yes)]
    #[case::data_on_ack(ConnClass::Ack, data_tx(1000), MatchResult::No)]
    #[case::data_on_bulk(ConnClass::BulkOut, data_tx(1000), MatchResult::Yes)]
    #[case::small_data_on_any(ConnClass::Any, data_tx(0), MatchResult::May)]
    fn test_match_tx_v3(#[case] class: ConnClass, #[case] tx: TxMessage, #[case] expected: MatchResult) {
        assert_eq!(for_version(ProtocolVersion::V3).match_tx(class, &tx), expected);
    }

    /// packing through the dispatch table: V1 frames have no message header
    #[test]
    fn test_pack_dispatch() {
        let tx = data_tx(10);

        let v1 = for_version(ProtocolVersion::V1).pack(&tx);
        let v2 = for_version(ProtocolVersion::V2).pack(&tx);

        assert_eq!(v1.header.len(), NetMessageHeader::SERIALIZED_LEN);
        assert_eq!(v2.header.len(),
                   crate::message::MessageHeader::SERIALIZED_LEN + NetMessageHeader::SERIALIZED_LEN);
    }
}
