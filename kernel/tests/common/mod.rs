//! Shared fixtures for the pool integration tests.
#![allow(dead_code)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use mqkernel::{GlobalHeap, KernelHeap, MsgPool, PoolConfig};

/// A heap that grants at most `budget` live blocks and counts them.
#[derive(Debug)]
pub struct BudgetHeap {
    budget: usize,
    live: AtomicUsize,
    total: AtomicUsize,
}

impl BudgetHeap {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            live: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    /// Blocks currently allocated.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Blocks ever handed out.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

unsafe impl KernelHeap for BudgetHeap {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.budget).then_some(live + 1)
            })
            .ok()?;
        match GlobalHeap.allocate(layout) {
            Some(ptr) => {
                self.total.fetch_add(1, Ordering::SeqCst);
                Some(ptr)
            }
            None => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        unsafe { GlobalHeap.deallocate(ptr, layout) };
    }
}

pub fn budget_pool(fixed: usize, irq: usize, heap_budget: usize) -> MsgPool<BudgetHeap> {
    init_logging();
    MsgPool::new(PoolConfig::new(fixed, irq), BudgetHeap::new(heap_budget)).expect("pool")
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
