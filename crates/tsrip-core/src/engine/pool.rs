//! Admission pool: a counting semaphore over in-flight fetches.
//!
//! Each fetch holds one slot for the duration of its network transfer, so
//! the concurrency cap holds no matter how the worker pool is shaped.
//! Slots are released through an RAII guard on every exit path, including
//! panic and cancellation.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct PoolState {
    in_use: usize,
    peak: usize,
}

/// Counting semaphore limiting concurrently outstanding fetches to a fixed
/// maximum. `acquire` blocks until a slot frees; no fairness order is
/// guaranteed, but every waiter is eventually admitted.
#[derive(Debug)]
pub struct AdmissionPool {
    limit: usize,
    state: Mutex<PoolState>,
    freed: Condvar,
}

impl AdmissionPool {
    /// Create a pool admitting at most `limit` concurrent holders
    /// (clamped to at least 1).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            state: Mutex::new(PoolState::default()),
            freed: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.state.lock().unwrap().in_use
    }

    /// High-water mark of concurrently held slots over the pool's lifetime.
    pub fn peak(&self) -> usize {
        self.state.lock().unwrap().peak
    }

    /// Block until a slot is free, take it, and return a guard that gives
    /// it back on drop.
    pub fn acquire(&self) -> SlotGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.in_use >= self.limit {
            state = self.freed.wait(state).unwrap();
        }
        state.in_use += 1;
        state.peak = state.peak.max(state.in_use);
        SlotGuard { pool: self }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        self.freed.notify_one();
    }
}

/// Releases the held admission slot when dropped.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    pool: &'a AdmissionPool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn zero_limit_is_clamped_to_one() {
        let pool = AdmissionPool::new(0);
        assert_eq!(pool.limit(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let pool = AdmissionPool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.in_use(), 2);
        drop(a);
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.peak(), 2);
    }

    #[test]
    fn concurrent_holders_never_exceed_limit() {
        let pool = Arc::new(AdmissionPool::new(3));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let _slot = pool.acquire();
                assert!(pool.in_use() <= pool.limit());
                std::thread::sleep(Duration::from_millis(5));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.in_use(), 0);
        assert!(pool.peak() <= 3);
        assert!(pool.peak() >= 1);
    }

    #[test]
    fn guard_releases_even_when_holder_panics() {
        let pool = Arc::new(AdmissionPool::new(1));
        let p = Arc::clone(&pool);
        let res = std::thread::spawn(move || {
            let _slot = p.acquire();
            panic!("holder died");
        })
        .join();
        assert!(res.is_err());
        assert_eq!(pool.in_use(), 0);
        // Pool still admits after the panic.
        let _slot = pool.acquire();
    }
}
