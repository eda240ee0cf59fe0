//! Per-neighbor rate limiting for REQUEST and PIECE sends.
//!
//! Two signed budgets in bytes per second gate outbound traffic: the
//! download budget gates REQUESTs (it caps what a neighbor sends the host)
//! and the upload budget gates PIECEs. A budget of `0` blocks everything,
//! a negative budget means unlimited, and a positive budget is compared
//! against the neighbor's sub-interval rate.
//!
//! Sends that hit a budget are parked here and retried by the swarm's
//! rate-limit tick.
//!
//! # Example
//!
//! ```
//! use swarmcast::RateLimiter;
//!
//! let limiter = RateLimiter::new(-1, 100 * 1024);
//! assert_eq!(limiter.download_limit(), -1);
//!
//! // Pause: block both directions.
//! limiter.set_download_limit(0);
//! limiter.set_upload_limit(0);
//! assert!(RateLimiter::limit_reached(0, 0));
//! ```

use crate::peer::{NeighborSession, PeerId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};

/// Delayed sends for one class of message, per neighbor, in arrival order.
#[derive(Debug, Default)]
struct DelayQueue {
    pending: Mutex<HashMap<PeerId, VecDeque<u32>>>,
}

impl DelayQueue {
    fn push(&self, peer: PeerId, piece: u32) {
        let mut pending = self.pending.lock();
        let queue = pending.entry(peer).or_default();
        if !queue.contains(&piece) {
            queue.push_back(piece);
        }
    }

    fn has_any(&self, peer: PeerId) -> bool {
        self.pending
            .lock()
            .get(&peer)
            .is_some_and(|queue| !queue.is_empty())
    }

    fn take_all(&self) -> HashMap<PeerId, VecDeque<u32>> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Puts unsent entries back ahead of anything queued in the meantime.
    fn restore(&self, peer: PeerId, mut unsent: VecDeque<u32>) {
        if unsent.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        let queue = pending.entry(peer).or_default();
        for piece in queue.drain(..) {
            if !unsent.contains(&piece) {
                unsent.push_back(piece);
            }
        }
        *queue = unsent;
    }

    fn remove_peer(&self, peer: PeerId) {
        self.pending.lock().remove(&peer);
    }

    fn len(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }
}

/// Download/upload budgets and the queues of sends they delayed.
#[derive(Debug)]
pub struct RateLimiter {
    download_limit: AtomicI64,
    upload_limit: AtomicI64,
    delayed_requests: DelayQueue,
    delayed_pieces: DelayQueue,
}

impl RateLimiter {
    /// Creates a limiter with the given budgets in bytes per second.
    pub fn new(download_limit: i64, upload_limit: i64) -> Self {
        Self {
            download_limit: AtomicI64::new(download_limit),
            upload_limit: AtomicI64::new(upload_limit),
            delayed_requests: DelayQueue::default(),
            delayed_pieces: DelayQueue::default(),
        }
    }

    /// Creates a limiter with no budgets.
    pub fn unlimited() -> Self {
        Self::new(-1, -1)
    }

    pub fn download_limit(&self) -> i64 {
        self.download_limit.load(Ordering::Relaxed)
    }

    pub fn set_download_limit(&self, bytes_per_sec: i64) {
        self.download_limit.store(bytes_per_sec, Ordering::Relaxed);
    }

    pub fn upload_limit(&self) -> i64 {
        self.upload_limit.load(Ordering::Relaxed)
    }

    pub fn set_upload_limit(&self, bytes_per_sec: i64) {
        self.upload_limit.store(bytes_per_sec, Ordering::Relaxed);
    }

    /// The budget rule shared by both directions.
    pub fn limit_reached(limit: i64, rate: u64) -> bool {
        match limit {
            0 => true,
            l if l < 0 => false,
            l => rate > l as u64,
        }
    }

    /// True if no more REQUESTs should go to `session` right now.
    pub fn has_reached_download_limit(&self, session: &NeighborSession) -> bool {
        let limit = self.download_limit();
        if limit <= 0 {
            return limit == 0;
        }
        Self::limit_reached(limit, session.counters().downloaded_sub_rate())
    }

    /// True if no more PIECEs should go to `session` right now.
    pub fn has_reached_upload_limit(&self, session: &NeighborSession) -> bool {
        let limit = self.upload_limit();
        if limit <= 0 {
            return limit == 0;
        }
        Self::limit_reached(limit, session.counters().uploaded_sub_rate())
    }

    pub fn delay_request(&self, peer: PeerId, piece: u32) {
        self.delayed_requests.push(peer, piece);
    }

    pub fn delay_piece(&self, peer: PeerId, piece: u32) {
        self.delayed_pieces.push(peer, piece);
    }

    /// True if a PIECE delivery to `peer` is already waiting.
    pub fn has_delayed_piece(&self, peer: PeerId) -> bool {
        self.delayed_pieces.has_any(peer)
    }

    pub fn has_delayed_request(&self, peer: PeerId) -> bool {
        self.delayed_requests.has_any(peer)
    }

    pub fn delayed_request_count(&self) -> usize {
        self.delayed_requests.len()
    }

    pub fn delayed_piece_count(&self) -> usize {
        self.delayed_pieces.len()
    }

    pub(crate) fn take_delayed_requests(&self) -> HashMap<PeerId, VecDeque<u32>> {
        self.delayed_requests.take_all()
    }

    pub(crate) fn take_delayed_pieces(&self) -> HashMap<PeerId, VecDeque<u32>> {
        self.delayed_pieces.take_all()
    }

    pub(crate) fn restore_requests(&self, peer: PeerId, unsent: VecDeque<u32>) {
        self.delayed_requests.restore(peer, unsent);
    }

    pub(crate) fn restore_pieces(&self, peer: PeerId, unsent: VecDeque<u32>) {
        self.delayed_pieces.restore(peer, unsent);
    }

    /// Drops everything queued for a neighbor.
    pub fn forget(&self, peer: PeerId) {
        self.delayed_requests.remove_peer(peer);
        self.delayed_pieces.remove_peer(peer);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(id: u32) -> NeighborSession {
        NeighborSession::new(
            PeerId::new(id).unwrap(),
            "127.0.0.1:6008".parse().unwrap(),
            8,
        )
    }

    #[test]
    fn test_limit_rule() {
        assert!(RateLimiter::limit_reached(0, 0));
        assert!(RateLimiter::limit_reached(0, 1_000_000));
        assert!(!RateLimiter::limit_reached(-1, 0));
        assert!(!RateLimiter::limit_reached(-1, u64::MAX));
        assert!(RateLimiter::limit_reached(100, 150));
        assert!(!RateLimiter::limit_reached(100, 50));
        assert!(!RateLimiter::limit_reached(100, 100));
    }

    #[test]
    fn test_zero_budget_always_blocks() {
        let limiter = RateLimiter::new(0, 0);
        let s = session(1);
        assert!(limiter.has_reached_download_limit(&s));
        assert!(limiter.has_reached_upload_limit(&s));

        s.counters().add_downloaded(1_000_000);
        assert!(limiter.has_reached_download_limit(&s));
    }

    #[test]
    fn test_negative_budget_never_blocks() {
        let limiter = RateLimiter::unlimited();
        let s = session(1);
        s.counters().add_downloaded(u32::MAX as u64);
        s.counters().add_uploaded(u32::MAX as u64);
        assert!(!limiter.has_reached_download_limit(&s));
        assert!(!limiter.has_reached_upload_limit(&s));
    }

    #[test]
    fn test_positive_budget_compares_sub_rate() {
        let limiter = RateLimiter::new(100, 100);

        let fast = session(1);
        fast.counters().backdate_sub(Duration::from_secs(5));
        fast.counters().add_downloaded(1000);
        fast.counters().add_uploaded(1000);
        assert!(limiter.has_reached_download_limit(&fast));
        assert!(limiter.has_reached_upload_limit(&fast));

        let slow = session(2);
        slow.counters().backdate_sub(Duration::from_secs(5));
        slow.counters().add_downloaded(250);
        slow.counters().add_uploaded(250);
        assert!(!limiter.has_reached_download_limit(&slow));
        assert!(!limiter.has_reached_upload_limit(&slow));
    }

    #[test]
    fn test_change_limit() {
        let limiter = RateLimiter::new(-1, -1);
        let s = session(1);
        assert!(!limiter.has_reached_download_limit(&s));

        limiter.set_download_limit(0);
        assert!(limiter.has_reached_download_limit(&s));
        assert!(!limiter.has_reached_upload_limit(&s));
    }

    #[test]
    fn test_delay_queue_dedup_and_order() {
        let limiter = RateLimiter::unlimited();
        let peer = PeerId::new(7).unwrap();

        limiter.delay_piece(peer, 3);
        limiter.delay_piece(peer, 1);
        limiter.delay_piece(peer, 3);
        assert!(limiter.has_delayed_piece(peer));
        assert_eq!(limiter.delayed_piece_count(), 2);

        let mut taken = limiter.take_delayed_pieces();
        assert!(!limiter.has_delayed_piece(peer));
        let queue = taken.remove(&peer).unwrap();
        assert_eq!(queue, VecDeque::from(vec![3, 1]));

        limiter.delay_piece(peer, 5);
        limiter.restore_pieces(peer, VecDeque::from(vec![1]));
        let queue = limiter.take_delayed_pieces().remove(&peer).unwrap();
        assert_eq!(queue, VecDeque::from(vec![1, 5]));
    }

    #[test]
    fn test_forget_peer() {
        let limiter = RateLimiter::unlimited();
        let peer = PeerId::new(7).unwrap();
        limiter.delay_request(peer, 1);
        limiter.delay_piece(peer, 2);

        limiter.forget(peer);
        assert!(!limiter.has_delayed_request(peer));
        assert!(!limiter.has_delayed_piece(peer));
    }
}
