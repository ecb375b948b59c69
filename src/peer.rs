use anyhow::anyhow;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, trace};

use crate::conn::{Conn, ZcAckOutcome};
use crate::error::ProtocolError;
use crate::message::ZcCookies;
use crate::pool::TxPool;
use crate::protocol::MatchResult;
use crate::tx::TxMessage;
use crate::wire::{ProtocolVersion, KEEPALIVE_PING};

pub type NodeId = u64;

/// Releases pinned zero-copy send buffers once the peer acknowledges them.
///  A buffer matches if its recorded cookie equals either bound or lies
///  strictly between them; matching stops after `limit` buffers. Returns the
///  number actually released.
#[cfg_attr(test, automock)]
pub trait ZcBufferRegistry: Send + Sync {
    fn release(&self, cookie1: u64, cookie2: u64, limit: u64) -> u64;
}

struct Peer {
    conns: Vec<Arc<Conn>>,
    next_zc_cookie: u64,
}

/// Read-mostly registry of peers and their established connections. The
///  lock spans all peers and is taken read-only on the ZC-ACK hot path.
pub struct PeerTable {
    peers: RwLock<FxHashMap<NodeId, Peer>>,
}

impl PeerTable {
    pub fn new() -> PeerTable {
        PeerTable {
            peers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn add_conn(&self, peer: NodeId, conn: Arc<Conn>) {
        let mut peers = self.peers.write().unwrap();
        peers
            .entry(peer)
            .or_insert_with(|| Peer {
                conns: Vec::new(),
                // the keepalive sentinel must never be assigned to a buffer
                next_zc_cookie: KEEPALIVE_PING + 1,
            })
            .conns
            .push(conn);
    }

    /// Drops all connections to the peer, e.g. when it is detected as
    ///  restarted through a changed incarnation.
    pub fn remove_conns(&self, peer: NodeId) {
        let mut peers = self.peers.write().unwrap();
        if let Some(entry) = peers.get_mut(&peer) {
            debug!("dropping {} connection(s) to peer {}", entry.conns.len(), peer);
            entry.conns.clear();
        }
    }

    /// The cookie to stamp onto the next zero-copy payload for this peer.
    pub fn assign_zc_cookie(&self, peer: NodeId) -> Option<u64> {
        let mut peers = self.peers.write().unwrap();
        let entry = peers.get_mut(&peer)?;
        let cookie = entry.next_zc_cookie;
        entry.next_zc_cookie += 1;
        Some(cookie)
    }
}

/// Picks the connection best suited to carry `probe` to the peer. V1
///  connections are skipped, they cannot represent an acknowledgment frame.
fn find_conn(peer: &Peer, probe: &TxMessage) -> Option<Arc<Conn>> {
    let mut fallback = None;

    for conn in &peer.conns {
        if conn.version() == ProtocolVersion::V1 {
            continue;
        }
        match conn.proto().match_tx(conn.class(), probe) {
            MatchResult::Yes => return Some(conn.clone()),
            MatchResult::May => {
                if fallback.is_none() {
                    fallback = Some(conn.clone());
                }
            }
            MatchResult::No => {}
        }
    }
    fallback
}

/// A peer asked us to acknowledge zero-copy buffer `cookie`. Tries to fold
///  the cookie into traffic already queued towards the peer; only when that
///  fails does it spend a dedicated acknowledgment frame.
///
/// `remote` marks acknowledgments relayed onwards (e.g. for a router), which
///  must not wait behind bulk traffic.
pub fn handle_zc_request(
    peers: &PeerTable,
    pool: &TxPool,
    peer: NodeId,
    cookie: u64,
    remote: bool,
) -> Result<(), ProtocolError> {
    let probe = TxMessage::ack_only(cookie, remote);

    {
        let table = peers.peers.read().unwrap();
        if let Some(entry) = table.get(&peer) {
            if let Some(conn) = find_conn(entry, &probe) {
                if let ZcAckOutcome::Coalesced { spare } = conn.queue_zcack(None, cookie) {
                    debug_assert!(spare.is_none());
                    trace!("ZC-ACK cookie {} piggybacked towards peer {}", cookie, peer);
                    return Ok(());
                }
            }
        }
    }

    // No in-flight traffic could take the cookie. The dedicated frame is
    //  taken from the pool before any queue lock is entered.
    let tx = pool.get(cookie, remote).ok_or(ProtocolError::OutOfMemory)?;

    let conn = {
        let table = peers.peers.read().unwrap();
        table.get(&peer).and_then(|entry| find_conn(entry, &tx))
    };
    let Some(conn) = conn else {
        pool.put(tx);
        return Err(ProtocolError::Socket(anyhow!(
            "no connection to peer {} can carry a standalone ACK", peer
        )));
    };

    match conn.queue_zcack(Some(tx), cookie) {
        ZcAckOutcome::Coalesced { spare } => {
            // lost a race against freshly queued traffic, which took the
            //  cookie instead
            if let Some(spare) = spare {
                pool.put(spare);
            }
        }
        ZcAckOutcome::NotCoalesced => {
            trace!("standalone ZC-ACK frame for cookie {} queued towards peer {}", cookie, peer);
        }
    }
    Ok(())
}

/// A received frame carried the acknowledgment pair `(cookie1, cookie2)`.
///  Derives how many buffers the pair covers and releases them through the
///  registry. A mismatch between the two counts means the local bookkeeping
///  and the peer disagree; it is reported but the connection survives.
pub fn handle_zc_ack(
    registry: &dyn ZcBufferRegistry,
    version: ProtocolVersion,
    cookie1: u64,
    cookie2: u64,
) -> Result<(), ProtocolError> {
    let cookies = ZcCookies::from_wire(cookie1, cookie2);

    if cookie2 == KEEPALIVE_PING && version == ProtocolVersion::V3 {
        // a heartbeat, not an acknowledgment
        if cookies.count() == 1 {
            return Ok(());
        }
        let (lo, hi) = cookies.release_bounds();
        return Err(ProtocolError::Mismatch {
            cookie1: lo,
            cookie2: hi,
            expected: cookies.count(),
            released: 0,
        });
    }

    if cookies == ZcCookies::Empty {
        debug!("ignoring empty ZC-ACK cookie pair");
        return Ok(());
    }

    let expected = cookies.count();
    let (lo, hi) = cookies.release_bounds();
    let released = registry.release(lo, hi, expected);

    if released != expected {
        error!(
            "ZC-ACK {}..{} released {} buffers, expected {}",
            lo, hi, released, expected
        );
        //TODO consider closing the connection once senders are known to keep
        //  exact bookkeeping
        return Err(ProtocolError::Mismatch {
            cookie1: lo,
            cookie2: hi,
            expected,
            released,
        });
    }
    Ok(())
}
