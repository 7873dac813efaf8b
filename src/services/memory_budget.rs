//! src/services/memory_budget.rs
//!
//! Shared accounting of bytes held in write buffers across every open
//! session. Buffer capacity alone bounds one session; this gauge is the
//! secondary trigger that bounds them together. It is injected rather than
//! global so each server (or test) owns its own.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct MemoryBudget {
    in_use: AtomicU64,
    peak: AtomicU64,
    ceiling: u64,
}

impl MemoryBudget {
    pub fn new(ceiling: u64) -> Self {
        Self {
            in_use: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            ceiling,
        }
    }

    /// Account for `bytes` newly held in a buffer.
    pub fn reserve(&self, bytes: u64) {
        let now = self.in_use.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak.fetch_max(now, Ordering::AcqRel);
    }

    /// Return `bytes` previously reserved.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }

    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// True once buffered bytes exceed the ceiling.
    pub fn under_pressure(&self) -> bool {
        self.in_use() > self.ceiling
    }

    /// Past half the ceiling; flushed buffers are freed instead of reused.
    pub fn should_reclaim(&self) -> bool {
        self.in_use() > self.ceiling / 2
    }
}
