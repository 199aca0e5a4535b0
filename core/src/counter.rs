//! Injectable request counter.
//!
//! # Design
//! One counter instance is handed to a `Transport` at construction and
//! incremented once per attempt that reaches the backend. Callers that want
//! a shared tally across transports clone the `Arc`; nothing is global.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RequestCounter {
    count: AtomicU64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Zero the counter and return the value it held.
    pub fn reset(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}
