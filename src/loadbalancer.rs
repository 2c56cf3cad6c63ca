//! Load balancer for distributing requests across the backends of a route
//!
//! Selection is purely positional: a shared cursor is advanced atomically on
//! every call and the backend at `cursor % len` is chosen. Backend health,
//! latency and connection counts are never consulted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter driving round-robin selection over one backend list
#[derive(Debug, Default)]
pub struct SelectionCursor {
    value: AtomicU64,
}

impl SelectionCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically advance the cursor and return the new value
    ///
    /// Every caller observes a distinct value, even under contention.
    pub fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Current cursor value (for statistics)
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Pick the index of the next backend for a list of `len` backends
///
/// # Panics
///
/// Panics if `len` is zero. Route matching never hands out an empty list.
pub fn select_index(len: usize, cursor: &SelectionCursor) -> usize {
    assert!(len > 0, "round-robin selection over an empty backend list");
    (cursor.advance() % len as u64) as usize
}

/// Pick the next backend in round-robin order
///
/// # Panics
///
/// Panics if `backends` is empty.
pub fn select<'a, T>(backends: &'a [T], cursor: &SelectionCursor) -> &'a T {
    &backends[select_index(backends.len(), cursor)]
}
