use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{trace, warn};

use crate::message::ZcCookies;
use crate::protocol::{self, Protocol};
use crate::tx::TxMessage;
use crate::wire::{ConnClass, MsgType, ProtocolVersion, KEEPALIVE_PING};

/// Result of trying to fold a ZC-ACK cookie into traffic that is already
///  queued on the connection.
#[derive(Debug)]
pub enum ZcAckOutcome {
    /// The cookie rides on a queued frame. A standalone frame supplied by
    ///  the caller was not needed and is handed back for pooling.
    Coalesced { spare: Option<TxMessage> },
    /// No queued frame could absorb the cookie. A standalone frame supplied
    ///  by the caller was enqueued instead.
    NotCoalesced,
}

impl ZcAckOutcome {
    pub fn is_coalesced(&self) -> bool {
        matches!(self, ZcAckOutcome::Coalesced { .. })
    }
}

/// A connection with negotiated version and traffic class. The send queue,
///  the carrier position and the cookie state of queued frames are one owned
///  struct behind the lock; everything in [`TxQueue`] runs under it and must
///  not block.
pub struct Conn {
    version: ProtocolVersion,
    class: ConnClass,
    flip: bool,
    proto: &'static dyn Protocol,
    tx: Mutex<TxQueue>,
}

impl Conn {
    pub fn new(version: ProtocolVersion, class: ConnClass, flip: bool) -> Conn {
        Conn {
            version,
            class,
            flip,
            proto: protocol::for_version(version),
            tx: Mutex::new(TxQueue::new()),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn class(&self) -> ConnClass {
        self.class
    }

    /// Whether the peer's byte order is flipped relative to ours, as
    ///  detected from the handshake magic.
    pub fn flip(&self) -> bool {
        self.flip
    }

    /// The protocol operations for this connection's negotiated version,
    ///  resolved once at setup.
    pub fn proto(&self) -> &'static dyn Protocol {
        self.proto
    }

    /// Enqueues a Data message. Returns a retired standalone ACK frame if
    ///  the message absorbed one, to be returned to the pool.
    pub fn queue_tx_msg(&self, tx: TxMessage) -> Option<TxMessage> {
        self.proto.queue_tx_msg(self, tx)
    }

    /// Folds a ZC-ACK cookie into queued traffic, or enqueues the supplied
    ///  standalone frame if that fails.
    pub fn queue_zcack(&self, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        self.proto.queue_zcack(self, tx_ack, cookie)
    }

    /// Hands the next frame to the socket writer. Once taken, a frame can no
    ///  longer absorb cookies.
    pub fn take_for_send(&self) -> Option<TxMessage> {
        self.tx.lock().unwrap().take_for_send()
    }

    pub fn queue_len(&self) -> usize {
        self.tx.lock().unwrap().queue.len()
    }

    pub(crate) fn enqueue_fifo(&self, tx: TxMessage) {
        self.tx.lock().unwrap().queue.push_back(tx);
    }

    pub(crate) fn enqueue_data_v2(&self, tx: TxMessage) -> Option<TxMessage> {
        self.tx.lock().unwrap().enqueue_data(tx)
    }

    pub(crate) fn queue_zcack_v2(&self, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        self.tx.lock().unwrap().queue_zcack_v2(tx_ack, cookie)
    }

    pub(crate) fn queue_zcack_v3(&self, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        self.tx.lock().unwrap().queue_zcack_v3(self.class, tx_ack, cookie)
    }
}

/// Per-connection transmit queue with the carrier position: the index of the
///  next-to-be-sent frame that is still eligible to have an ACK cookie
///  piggybacked onto it. The carrier only ever moves forward.
struct TxQueue {
    queue: VecDeque<TxMessage>,
    carrier: Option<usize>,
}

impl TxQueue {
    fn new() -> TxQueue {
        TxQueue {
            queue: VecDeque::new(),
            carrier: None,
        }
    }

    fn carrier_type(&self, idx: usize) -> MsgType {
        self.queue[idx].msg_type
    }

    /// Moves the carrier to the next queued frame, or to none if the queue
    ///  is exhausted behind it.
    fn advance_carrier(&mut self) {
        assert!(!self.queue.is_empty());
        let idx = self.carrier.expect("advancing a non-existent carrier");

        let next = idx + 1;
        if next >= self.queue.len() {
            self.carrier = None;
        }
        else {
            // queued frames change type only at a carrier replacement, never
            //  behind the carrier
            assert_eq!(
                self.carrier_type(next), self.carrier_type(idx),
                "carrier type changed mid-queue"
            );
            self.carrier = Some(next);
        }
    }

    fn append_as_carrier(&mut self, tx: TxMessage) {
        self.queue.push_back(tx);
        self.carrier = Some(self.queue.len() - 1);
    }

    /// V2/V3 Data enqueue. An ACK-only carrier is retired, its pending
    ///  cookies ride on the new message instead; the retired frame is
    ///  returned for pooling. A Data carrier keeps its position, the new
    ///  message queues behind it.
    fn enqueue_data(&mut self, tx: TxMessage) -> Option<TxMessage> {
        assert_eq!(tx.msg_type, MsgType::Data);

        match self.carrier {
            None => {
                self.append_as_carrier(tx);
                None
            }
            Some(idx) if self.carrier_type(idx) == MsgType::AckOnly => {
                let retired = std::mem::replace(&mut self.queue[idx], tx);
                self.queue[idx].zc_ack = retired.zc_ack;
                trace!("retired ACK placeholder, its cookies ride on the new Data frame");
                Some(retired)
            }
            Some(_) => {
                self.queue.push_back(tx);
                None
            }
        }
    }

    /// V2: a Data carrier has exactly one piggyback slot; an ACK-only
    ///  carrier's slot is reserved for its own cookie.
    fn queue_zcack_v2(&mut self, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        if let Some(ack) = &tx_ack {
            assert_eq!(ack.msg_type, MsgType::AckOnly);
        }

        let Some(idx) = self.carrier else {
            if let Some(ack) = tx_ack {
                self.append_as_carrier(ack);
            }
            return ZcAckOutcome::NotCoalesced;
        };

        if self.carrier_type(idx) == MsgType::AckOnly {
            if let Some(ack) = tx_ack {
                self.queue.push_back(ack);
            }
            return ZcAckOutcome::NotCoalesced;
        }

        let cookie = tx_ack.as_ref().map(|a| a.single_ack_cookie()).unwrap_or(cookie);

        let carrier = &mut self.queue[idx];
        assert_eq!(carrier.zc_ack, ZcCookies::Empty, "piggyback slot already taken");
        carrier.zc_ack = ZcCookies::Single(cookie);

        // this carrier is full now, the next frame takes the next cookie
        self.advance_carrier();

        ZcAckOutcome::Coalesced { spare: tx_ack }
    }

    /// V3: on a dedicated ACK connection the carrier's cookie pair can hold
    ///  one cookie, two discrete cookies at most 2 apart, or a contiguous
    ///  range. Any other connection class behaves exactly like V2.
    fn queue_zcack_v3(&mut self, class: ConnClass, tx_ack: Option<TxMessage>, cookie: u64) -> ZcAckOutcome {
        if class != ConnClass::Ack {
            return self.queue_zcack_v2(tx_ack, cookie);
        }

        if let Some(ack) = &tx_ack {
            assert_eq!(ack.msg_type, MsgType::AckOnly);
        }

        let Some(idx) = self.carrier else {
            if let Some(ack) = tx_ack {
                self.append_as_carrier(ack);
            }
            return ZcAckOutcome::NotCoalesced;
        };

        let cookie = tx_ack.as_ref().map(|a| a.single_ack_cookie()).unwrap_or(cookie);

        if cookie == KEEPALIVE_PING {
            // carries no buffer-release information, the connection is busy anyway
            return ZcAckOutcome::Coalesced { spare: tx_ack };
        }

        if self.queue[idx].zc_ack == ZcCookies::Single(KEEPALIVE_PING) {
            // the keepalive was only keeping the slot warm, replace it
            self.queue[idx].zc_ack = ZcCookies::Single(cookie);
            return ZcAckOutcome::Coalesced { spare: tx_ack };
        }

        let (c0, c1) = self.queue[idx].zc_ack.to_wire();
        if cookie == c0 || cookie == c1 {
            warn!("cookie {} is already piggybacked on this connection", cookie);
            //TODO surface duplicate cookies to the peer handler as an error
            return ZcAckOutcome::Coalesced { spare: tx_ack };
        }

        let coalesced = match self.queue[idx].zc_ack {
            ZcCookies::Empty => {
                self.queue[idx].zc_ack = ZcCookies::Single(cookie);
                true
            }
            ZcCookies::Single(existing) => {
                let (hi, lo) = if existing > cookie {
                    (existing, cookie)
                }
                else {
                    (cookie, existing)
                };
                self.queue[idx].zc_ack = ZcCookies::Discrete(hi, lo);

                if hi - lo > 2 {
                    // not likely to carry more ACKs, skip it to simplify logic
                    self.advance_carrier();
                }
                true
            }
            ZcCookies::Discrete(hi, lo) => {
                assert!(hi - lo <= 2);

                // the pair collapses into a range iff the result covers
                //  exactly three consecutive values
                let fill = if hi - lo == 2 {
                    if cookie == lo + 1 { Some(cookie) } else { None }
                }
                else if lo.checked_sub(1) == Some(cookie) {
                    Some(lo)
                }
                else if hi.checked_add(1) == Some(cookie) {
                    Some(hi)
                }
                else {
                    None
                };

                match fill {
                    Some(mid) => {
                        self.queue[idx].zc_ack = ZcCookies::Range(mid - 1, mid + 1);
                        true
                    }
                    None => false,
                }
            }
            ZcCookies::Range(lo, hi) => {
                if cookie >= lo && cookie <= hi {
                    warn!("cookie {} is already covered by ACK range {}..{}", cookie, lo, hi);
                    //TODO surface duplicate cookies to the peer handler as an error
                    true
                }
                else if hi.checked_add(1) == Some(cookie) {
                    self.queue[idx].zc_ack = ZcCookies::Range(lo, cookie);
                    true
                }
                else if lo.checked_sub(1) == Some(cookie) {
                    self.queue[idx].zc_ack = ZcCookies::Range(cookie, hi);
                    true
                }
                else {
                    false
                }
            }
        };

        if coalesced {
            return ZcAckOutcome::Coalesced { spare: tx_ack };
        }

        // the carrier is saturated
        if let Some(ack) = tx_ack {
            self.queue.push_back(ack);
            // the fresh frame can absorb at least one more cookie
            self.advance_carrier();
        }
        ZcAckOutcome::NotCoalesced
    }

    fn take_for_send(&mut self) -> Option<TxMessage> {
        if self.queue.is_empty() {
            return None;
        }

        if self.carrier == Some(0) {
            // the frame leaves the queue, it cannot absorb cookies any more
            self.advance_carrier();
        }
        let tx = self.queue.pop_front();
        if let Some(idx) = self.carrier {
            self.carrier = Some(idx - 1);
        }
        tx
    }
}
