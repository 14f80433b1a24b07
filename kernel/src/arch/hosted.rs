//! Hosted interrupt backend.
//!
//! There is no interrupt flag to flip in a user process, so each thread keeps
//! a shadow of one. Threads start with interrupts enabled and outside any
//! handler, like a freshly scheduled kernel task.

use std::cell::Cell;

thread_local! {
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
    static IRQ_DEPTH: Cell<u32> = const { Cell::new(0) };
}

#[inline]
pub(super) fn irqs_enabled() -> bool {
    IRQ_ENABLED.with(Cell::get)
}

#[inline]
pub(super) fn irq_disable() {
    IRQ_ENABLED.with(|flag| flag.set(false));
}

#[inline]
pub(super) fn irq_enable() {
    IRQ_ENABLED.with(|flag| flag.set(true));
}

#[inline]
pub(super) fn irq_depth() -> u32 {
    IRQ_DEPTH.with(Cell::get)
}

pub(super) fn irq_depth_add(delta: i32) {
    IRQ_DEPTH.with(|depth| {
        let next = depth.get().checked_add_signed(delta);
        debug_assert!(next.is_some(), "unbalanced irq_enter/irq_exit");
        depth.set(next.unwrap_or(0));
    });
}

/// A host thread may be descheduled while it holds a ticket; waiters yield.
#[inline]
pub(super) fn cpu_relax() {
    core::hint::spin_loop();
    std::thread::yield_now();
}
