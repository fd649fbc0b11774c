//! Run-scoped memory accounting.
//!
//! Workers acquire a byte ticket before allocating a tile's working
//! buffers and release it on drop, so the ceiling holds on every exit
//! path. Freed tile buffers may be parked in a pool for reuse; pooled
//! capacity still counts against the budget. A reservation that would
//! cross the warning line first reclaims stale pooled buffers, and the
//! stream manager runs the same TTL cleanup before resorting to
//! shrinking the tile size.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Usage fraction above which acquisitions reclaim stale pool entries.
pub const WARNING_FRACTION: f64 = 0.8;

/// Usage fraction reservations may never cross.
pub const CRITICAL_FRACTION: f64 = 0.9;

/// Pooled buffers idle longer than this are dropped by cleanup.
pub const POOL_TTL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct BudgetState {
    /// Bytes held by live tickets.
    ticketed: usize,
    /// Capacity parked in the reuse pool.
    pooled: usize,
    peak: usize,
    pool: Vec<PooledBuffer>,
}

#[derive(Debug)]
struct PooledBuffer {
    bytes: Vec<u8>,
    parked_at: Instant,
}

/// Byte-equivalent accounting for one pipeline run.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    state: Mutex<BudgetState>,
}

impl MemoryBudget {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            limit: limit_bytes,
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn critical(&self) -> usize {
        (self.limit as f64 * CRITICAL_FRACTION) as usize
    }

    /// Bytes a ticket may still claim before hitting the critical line.
    pub fn headroom(&self) -> usize {
        let state = self.state.lock().unwrap();
        self.critical().saturating_sub(state.ticketed + state.pooled)
    }

    pub fn usage_fraction(&self) -> f64 {
        let state = self.state.lock().unwrap();
        (state.ticketed + state.pooled) as f64 / self.limit as f64
    }

    pub fn peak_bytes(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    /// Try to reserve `bytes`; `None` when the reservation would cross
    /// the critical threshold. A reservation that would land past the
    /// warning line first reclaims stale pool entries.
    pub fn try_acquire(&self, bytes: usize) -> Option<MemoryTicket<'_>> {
        let mut state = self.state.lock().unwrap();
        let warning = (self.limit as f64 * WARNING_FRACTION) as usize;
        if state.ticketed + state.pooled + bytes > warning {
            reclaim_stale(&mut state, POOL_TTL);
        }
        if state.ticketed + state.pooled + bytes > self.critical() {
            return None;
        }
        state.ticketed += bytes;
        state.peak = state.peak.max(state.ticketed + state.pooled);
        Some(MemoryTicket {
            budget: self,
            bytes,
        })
    }

    /// Drop pooled buffers idle longer than `ttl`; returns bytes freed.
    pub fn cleanup(&self, ttl: Duration) -> usize {
        let mut state = self.state.lock().unwrap();
        reclaim_stale(&mut state, ttl)
    }

    /// Park a buffer for reuse; its capacity stays counted.
    pub fn park_buffer(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.pooled += bytes.capacity();
        state.pool.push(PooledBuffer {
            bytes,
            parked_at: Instant::now(),
        });
    }

    /// Take a pooled buffer of at least `min_capacity`, if any. The
    /// caller's ticket must already cover the returned capacity.
    pub fn take_buffer(&self, min_capacity: usize) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let idx = state
            .pool
            .iter()
            .position(|b| b.bytes.capacity() >= min_capacity)?;
        let buf = state.pool.swap_remove(idx).bytes;
        state.pooled = state.pooled.saturating_sub(buf.capacity());
        Some(buf)
    }
}

fn reclaim_stale(state: &mut BudgetState, ttl: Duration) -> usize {
    let now = Instant::now();
    let mut freed = 0;
    state.pool.retain(|b| {
        if now.duration_since(b.parked_at) >= ttl {
            freed += b.bytes.capacity();
            false
        } else {
            true
        }
    });
    state.pooled = state.pooled.saturating_sub(freed);
    if freed > 0 {
        debug!(freed, "memory cleanup reclaimed pooled buffers");
    }
    freed
}

/// Scoped reservation; releases its bytes when dropped.
#[derive(Debug)]
pub struct MemoryTicket<'a> {
    budget: &'a MemoryBudget,
    bytes: usize,
}

impl MemoryTicket<'_> {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.budget.state.lock().unwrap();
        state.ticketed = state.ticketed.saturating_sub(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let budget = MemoryBudget::new(1000);
        let ticket = budget.try_acquire(500).expect("fits under critical");
        assert_eq!(ticket.bytes(), 500);
        assert!(budget.usage_fraction() > 0.49);
        drop(ticket);
        assert_eq!(budget.usage_fraction(), 0.0);
    }

    #[test]
    fn critical_threshold_blocks() {
        let budget = MemoryBudget::new(1000);
        // 90% of 1000 = 900.
        assert!(budget.try_acquire(901).is_none());
        let _a = budget.try_acquire(800).unwrap();
        assert!(budget.try_acquire(200).is_none());
        assert!(budget.try_acquire(100).is_some());
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let budget = MemoryBudget::new(1000);
        {
            let _a = budget.try_acquire(600).unwrap();
        }
        let _b = budget.try_acquire(100).unwrap();
        assert_eq!(budget.peak_bytes(), 600);
    }

    #[test]
    fn pooled_capacity_counts_toward_budget() {
        let budget = MemoryBudget::new(1000);
        budget.park_buffer(vec![0u8; 800]);
        assert!(budget.try_acquire(200).is_none());
        budget.cleanup(Duration::ZERO);
        assert!(budget.try_acquire(200).is_some());
    }

    #[test]
    fn stale_pool_is_reclaimed_at_the_warning_line() {
        let budget = MemoryBudget::new(1000);
        budget.park_buffer(vec![0u8; 850]);
        std::thread::sleep(POOL_TTL);
        // 850 + 200 crosses the 800-byte warning line; the stale buffer
        // is reclaimed inside the acquisition itself.
        budget
            .try_acquire(200)
            .expect("acquisition reclaims the stale buffer");
    }

    #[test]
    fn pool_reuse_prefers_fitting_buffer() {
        let budget = MemoryBudget::new(10_000);
        budget.park_buffer(vec![0u8; 256]);
        assert!(budget.take_buffer(512).is_none());
        let buf = budget.take_buffer(128).expect("256-byte buffer fits");
        assert!(buf.capacity() >= 256);
        assert!(budget.take_buffer(1).is_none(), "pool now empty");
        assert_eq!(budget.headroom(), 9_000, "taken buffer no longer pooled");
    }

    #[test]
    fn cleanup_respects_ttl() {
        let budget = MemoryBudget::new(10_000);
        budget.park_buffer(vec![0u8; 256]);
        assert_eq!(budget.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(budget.cleanup(Duration::ZERO), 256);
    }
}
