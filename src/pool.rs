use std::sync::Mutex;
use tracing::{debug, trace};

use crate::message::ZcCookies;
use crate::tx::TxMessage;

/// Bounded pool of frames for standalone acknowledgments. The pool is
///  filled once at startup; an empty pool means the node is out of ACK
///  frames and the requester has to back off and retry, it never blocks.
pub struct TxPool {
    frames: Mutex<Vec<TxMessage>>,
}

impl TxPool {
    pub fn new(pool_size: usize) -> TxPool {
        let frames = (0..pool_size)
            .map(|_| TxMessage::ack_only(0, false))
            .collect();

        TxPool {
            frames: Mutex::new(frames),
        }
    }

    pub fn get(&self, cookie: u64, nonblocking: bool) -> Option<TxMessage> {
        let mut frames = self.frames.lock().unwrap();
        match frames.pop() {
            Some(mut frame) => {
                trace!("taking ACK frame from pool, {} left", frames.len());
                frame.zc_ack = ZcCookies::Single(cookie);
                frame.nonblocking = nonblocking;
                Some(frame)
            }
            None => {
                debug!("ACK frame pool is exhausted");
                None
            }
        }
    }

    pub fn put(&self, mut frame: TxMessage) {
        frame.zc_ack = ZcCookies::Empty;
        frame.nonblocking = false;

        self.frames.lock().unwrap().push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_sets_cookie() {
        let pool = TxPool::new(2);

        let frame = pool.get(17, true).unwrap();
        assert_eq!(frame.zc_ack, ZcCookies::Single(17));
        assert!(frame.nonblocking);
    }

    #[test]
    fn test_exhaustion_and_return() {
        let pool = TxPool::new(1);

        let frame = pool.get(5, false).unwrap();
        assert!(pool.get(6, false).is_none());

        pool.put(frame);
        assert!(pool.get(7, false).is_some());
    }
}
