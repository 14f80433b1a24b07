//! Pool counters.
//!
//! Counters are plain relaxed atomics: they are bumped from interrupt
//! handlers, so they must never take the pool lock on their own.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Descriptors currently on the fixed free list.
    pub fixed_free: usize,
    /// Descriptors currently on the interrupt reserve free list.
    pub irq_free: usize,
    /// Dynamic descriptors handed out and not yet released.
    pub dynamic_in_use: usize,
    pub fixed_allocs: usize,
    pub irq_allocs: usize,
    pub dynamic_allocs: usize,
    pub releases: usize,
    /// Task-context acquisitions that failed: fixed pool and heap both empty.
    pub task_exhausted: usize,
    /// Interrupt-context acquisitions dropped on an empty reserve.
    pub irq_exhausted: usize,
}

#[derive(Debug, Default)]
pub(super) struct AtomicPoolStats {
    dynamic_in_use: AtomicUsize,
    fixed_allocs: AtomicUsize,
    irq_allocs: AtomicUsize,
    dynamic_allocs: AtomicUsize,
    releases: AtomicUsize,
    task_exhausted: AtomicUsize,
    irq_exhausted: AtomicUsize,
}

impl AtomicPoolStats {
    pub(super) const fn new() -> Self {
        Self {
            dynamic_in_use: AtomicUsize::new(0),
            fixed_allocs: AtomicUsize::new(0),
            irq_allocs: AtomicUsize::new(0),
            dynamic_allocs: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            task_exhausted: AtomicUsize::new(0),
            irq_exhausted: AtomicUsize::new(0),
        }
    }

    pub(super) fn record_fixed_alloc(&self) {
        self.fixed_allocs.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_irq_alloc(&self) {
        self.irq_allocs.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dynamic_alloc(&self) {
        self.dynamic_allocs.fetch_add(1, Ordering::Relaxed);
        self.dynamic_in_use.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dynamic_free(&self) {
        self.dynamic_in_use.fetch_sub(1, Ordering::Relaxed);
    }

    pub(super) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_task_exhausted(&self) {
        self.task_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_irq_exhausted(&self) {
        self.irq_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter snapshot; free-list lengths are filled in by the caller.
    pub(super) fn snapshot(&self, fixed_free: usize, irq_free: usize) -> PoolStats {
        PoolStats {
            fixed_free,
            irq_free,
            dynamic_in_use: self.dynamic_in_use.load(Ordering::Relaxed),
            fixed_allocs: self.fixed_allocs.load(Ordering::Relaxed),
            irq_allocs: self.irq_allocs.load(Ordering::Relaxed),
            dynamic_allocs: self.dynamic_allocs.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            task_exhausted: self.task_exhausted.load(Ordering::Relaxed),
            irq_exhausted: self.irq_exhausted.load(Ordering::Relaxed),
        }
    }
}
