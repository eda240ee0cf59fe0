use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Byte counters for one neighbor, kept from the host's point of view.
///
/// `downloaded` counts piece payload received from the neighbor and
/// `uploaded` counts piece payload sent to it. Each has a lifetime total
/// and a sub-interval count that the choke scheduler resets every round.
/// Counters survive reconnects; only [`reset_sub`](Self::reset_sub) clears
/// the sub-interval half.
#[derive(Debug)]
pub struct TransferCounters {
    created_at: Instant,
    downloaded_total: AtomicU64,
    downloaded_sub: AtomicU64,
    uploaded_total: AtomicU64,
    uploaded_sub: AtomicU64,
    sub_started_at: Mutex<Instant>,
}

impl TransferCounters {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            downloaded_total: AtomicU64::new(0),
            downloaded_sub: AtomicU64::new(0),
            uploaded_total: AtomicU64::new(0),
            uploaded_sub: AtomicU64::new(0),
            sub_started_at: Mutex::new(now),
        }
    }

    pub fn add_downloaded(&self, bytes: u64) {
        self.downloaded_total.fetch_add(bytes, Ordering::Relaxed);
        self.downloaded_sub.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_uploaded(&self, bytes: u64) {
        self.uploaded_total.fetch_add(bytes, Ordering::Relaxed);
        self.uploaded_sub.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn downloaded_total(&self) -> u64 {
        self.downloaded_total.load(Ordering::Relaxed)
    }

    pub fn downloaded_sub(&self) -> u64 {
        self.downloaded_sub.load(Ordering::Relaxed)
    }

    pub fn uploaded_total(&self) -> u64 {
        self.uploaded_total.load(Ordering::Relaxed)
    }

    pub fn uploaded_sub(&self) -> u64 {
        self.uploaded_sub.load(Ordering::Relaxed)
    }

    /// Bytes per second received from the neighbor since the session was created.
    pub fn downloaded_total_rate(&self) -> u64 {
        bytes_per_sec(self.downloaded_total(), self.created_at.elapsed())
    }

    /// Bytes per second sent to the neighbor since the session was created.
    pub fn uploaded_total_rate(&self) -> u64 {
        bytes_per_sec(self.uploaded_total(), self.created_at.elapsed())
    }

    /// Bytes per second received from the neighbor in the current sub-interval.
    pub fn downloaded_sub_rate(&self) -> u64 {
        let started = *self.sub_started_at.lock();
        bytes_per_sec(self.downloaded_sub(), started.elapsed())
    }

    /// Bytes per second sent to the neighbor in the current sub-interval.
    pub fn uploaded_sub_rate(&self) -> u64 {
        let started = *self.sub_started_at.lock();
        bytes_per_sec(self.uploaded_sub(), started.elapsed())
    }

    /// Starts a new sub-interval.
    pub fn reset_sub(&self) {
        let mut started = self.sub_started_at.lock();
        self.downloaded_sub.store(0, Ordering::Relaxed);
        self.uploaded_sub.store(0, Ordering::Relaxed);
        *started = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn backdate_sub(&self, by: Duration) {
        let mut started = self.sub_started_at.lock();
        if let Some(earlier) = started.checked_sub(by) {
            *started = earlier;
        }
    }
}

impl Default for TransferCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn bytes_per_sec(count: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis() as u64;
    if millis == 0 {
        return 0;
    }
    count.saturating_mul(1000) / millis
}
