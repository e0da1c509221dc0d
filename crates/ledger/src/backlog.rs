//! Backlog accounting.
//!
//! The unsynced-event count is maintained on the append/mark paths as an
//! atomic, never computed by a query that would block the evaluator's write
//! path. It is seeded once from storage at startup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, monotonically-maintained count of unsynced events.
#[derive(Debug, Clone, Default)]
pub struct BacklogCounter {
    count: Arc<AtomicU64>,
}

impl BacklogCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from storage. Startup only; overwrites whatever was counted.
    pub fn seed(&self, count: u64) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn incremented(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decremented_by(&self, n: u64) {
        // Saturating: a double mark must not wrap the counter.
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(n);
            match self.count.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}
