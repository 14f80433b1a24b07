// =============================================================================
// mqkernel: Message Descriptor Pool Manager
// =============================================================================
//
// Three sources of descriptors, one rule for returning them:
//
//   acquire (task context)       fixed free list ──empty──▶ kernel heap
//   acquire (interrupt context)  irq reserve free list ──empty──▶ fail
//
//   release Fixed    ──▶ tail of the fixed free list     (under the lock)
//   release Irq      ──▶ tail of the irq free list       (under the lock)
//   release Dynamic  ──▶ kernel heap                     (no lock)
//   release <other>  ──▶ fatal: descriptor memory is corrupt
//   release foreign  ──▶ fatal: another pool issued the handle
//
// Interrupt handlers never touch the heap, so they never wait on it and are
// never starved by task-context senders draining the fixed pool.
//
// LOCKING:
//   Both free lists sit behind one IrqSpinLock. Critical sections are a
//   single push or pop. The heap is always called with the lock released.
// =============================================================================

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt;
use core::mem::size_of;
use core::ptr::NonNull;

use super::freelist::FreeList;
use super::msg::{AllocType, MqMsg, MsgBox};
use super::stats::{AtomicPoolStats, PoolStats};
use super::ExecContext;
use crate::arch;
use crate::config::PoolConfig;
use crate::error::{MqError, Result};
use crate::memory::heap::{GlobalHeap, KernelHeap};
use crate::sync::spinlock::IrqSpinLock;

/// Both free lists; guarded together by the pool lock.
struct FreeLists {
    fixed: FreeList,
    irq: FreeList,
}

/// Result of [`MsgPool::audit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAudit {
    /// Descriptors on the fixed free list.
    pub fixed_free: usize,
    /// Descriptors on the interrupt reserve free list.
    pub irq_free: usize,
    /// Pre-allocated descriptors currently owned by callers.
    pub in_flight: usize,
}

/// The message descriptor pool manager.
///
/// Construct once at boot (see [`crate::mqueue::initialize`] for the
/// process-wide instance) before any interrupt handler that sends messages
/// is enabled. There is no teardown: the kernel instance lives forever.
pub struct MsgPool<H: KernelHeap = GlobalHeap> {
    lists: IrqSpinLock<FreeLists>,
    /// Backing store for every pre-allocated descriptor: the fixed pool
    /// first, then the interrupt reserve.
    slab: NonNull<[MqMsg]>,
    heap: H,
    config: PoolConfig,
    stats: AtomicPoolStats,
}

// SAFETY: the slab is only reached through descriptors that are either on a
// locked free list or exclusively owned by one `MsgBox`.
unsafe impl<H: KernelHeap + Send> Send for MsgPool<H> {}
unsafe impl<H: KernelHeap> Sync for MsgPool<H> {}

impl MsgPool<GlobalHeap> {
    /// A pool whose dynamic descriptors come from the global allocator.
    pub fn with_global_heap(config: PoolConfig) -> Result<Self> {
        Self::new(config, GlobalHeap)
    }
}

impl<H: KernelHeap> MsgPool<H> {
    /// Allocates the slab and links every descriptor into its free list.
    pub fn new(config: PoolConfig, heap: H) -> Result<Self> {
        config.validate()?;
        let total = config.fixed_msgs + config.irq_msgs;

        let mut descs = Vec::new();
        descs
            .try_reserve_exact(total)
            .map_err(|_| MqError::OutOfMemory)?;
        descs.extend((0..config.fixed_msgs).map(|_| MqMsg::new(AllocType::Fixed)));
        descs.extend((0..config.irq_msgs).map(|_| MqMsg::new(AllocType::Irq)));
        let slab = NonNull::from(Box::leak(descs.into_boxed_slice()));

        let mut lists = FreeLists {
            fixed: FreeList::new(AllocType::Fixed),
            irq: FreeList::new(AllocType::Irq),
        };
        for index in 0..total {
            // SAFETY: `index` is inside the slab we just leaked, and every
            // descriptor enters exactly one list exactly once.
            unsafe {
                let msg = slab.cast::<MqMsg>().add(index);
                if index < config.fixed_msgs {
                    lists.fixed.push_back(msg);
                } else {
                    lists.irq.push_back(msg);
                }
            }
        }

        log::info!(
            "mqueue: {} fixed + {} irq descriptors, {} bytes each",
            config.fixed_msgs,
            config.irq_msgs,
            size_of::<MqMsg>(),
        );

        Ok(Self {
            lists: IrqSpinLock::new(lists),
            slab,
            heap,
            config,
            stats: AtomicPoolStats::new(),
        })
    }

    /// Acquires a descriptor for the calling context.
    pub fn alloc_msg(&self) -> Result<MsgBox<'_>> {
        self.alloc_msg_in(ExecContext::current())
    }

    /// Acquires a descriptor on behalf of `ctx`.
    ///
    /// Interrupt context only ever draws on the reserve and fails with
    /// [`MqError::IrqPoolExhausted`] when it is empty. Task context draws on
    /// the fixed pool, then on the heap, and fails with
    /// [`MqError::OutOfMemory`] when both are empty. Never blocks.
    pub fn alloc_msg_in(&self, ctx: ExecContext) -> Result<MsgBox<'_>> {
        match ctx {
            ExecContext::Interrupt => {
                let msg = self.lists.lock_irqsave().irq.pop_front();
                match msg {
                    Some(msg) => {
                        self.stats.record_irq_alloc();
                        // SAFETY: popped from a free list, so nobody else owns it.
                        Ok(unsafe { MsgBox::from_raw(msg, self.identity()) })
                    }
                    None => {
                        // No logging here: the logger may not be interrupt-safe.
                        self.stats.record_irq_exhausted();
                        Err(MqError::IrqPoolExhausted)
                    }
                }
            }
            ExecContext::Task => {
                let msg = self.lists.lock_irqsave().fixed.pop_front();
                match msg {
                    Some(msg) => {
                        self.stats.record_fixed_alloc();
                        // SAFETY: popped from a free list, so nobody else owns it.
                        Ok(unsafe { MsgBox::from_raw(msg, self.identity()) })
                    }
                    None => self.alloc_dynamic(),
                }
            }
        }
    }

    fn alloc_dynamic(&self) -> Result<MsgBox<'_>> {
        debug_assert!(
            !arch::in_interrupt(),
            "mqueue: dynamic descriptor requested from interrupt context"
        );

        let Some(block) = self.heap.allocate(Layout::new::<MqMsg>()) else {
            self.stats.record_task_exhausted();
            log::warn!("mqueue: fixed pool empty and heap allocation failed");
            return Err(MqError::OutOfMemory);
        };

        let msg = block.cast::<MqMsg>();
        // SAFETY: the heap returned a block sized and aligned for `MqMsg`.
        unsafe { msg.as_ptr().write(MqMsg::new(AllocType::Dynamic)) };
        self.stats.record_dynamic_alloc();
        log::debug!("mqueue: fixed pool empty, dynamic descriptor at {:p}", msg);

        // SAFETY: fresh heap block, initialized above.
        Ok(unsafe { MsgBox::from_raw(msg, self.identity()) })
    }

    /// Releases a descriptor to wherever its tag says it came from.
    ///
    /// Exactly one free-list append or one heap free happens. A descriptor
    /// issued by another pool, a tag that names no pool, or a pooled tag
    /// that disagrees with the descriptor's slab slot means the descriptor
    /// was overwritten or misrouted; that is reported through
    /// [`fatal!`](crate::fatal) before any list or heap is touched.
    pub fn free_msg(&self, msg: MsgBox<'_>) {
        let origin = msg.origin();
        let tag = msg.alloc_type;
        let msg = msg.into_raw();

        if origin != self.identity() {
            crate::fatal!(
                "mqueue: descriptor {:p} released to a pool that did not issue it",
                msg
            );
        }

        match AllocType::from_raw(tag) {
            Some(kind @ (AllocType::Fixed | AllocType::Irq)) => {
                let home = self.home_of(msg);
                if home != Some(kind) {
                    crate::fatal!(
                        "mqueue: descriptor {:p} tagged {:?} but its slot belongs to {:?}",
                        msg,
                        kind,
                        home
                    );
                }
                let mut lists = self.lists.lock_irqsave();
                // SAFETY: the handle owned the descriptor and is consumed,
                // and the slot check above proved it lives on this list's
                // part of our slab.
                unsafe {
                    match kind {
                        AllocType::Irq => lists.irq.push_back(msg),
                        _ => lists.fixed.push_back(msg),
                    }
                };
            }
            Some(AllocType::Dynamic) => {
                // Handlers only ever hold reserve descriptors.
                debug_assert!(
                    !arch::in_interrupt(),
                    "mqueue: dynamic descriptor released from interrupt context"
                );
                // SAFETY: the origin check proved `alloc_dynamic` on this
                // pool, so this heap with this layout; the handle is consumed.
                unsafe {
                    self.heap
                        .deallocate(msg.cast::<u8>(), Layout::new::<MqMsg>())
                };
                self.stats.record_dynamic_free();
            }
            None => crate::fatal!(
                "mqueue: descriptor {:p} released with corrupt alloc type {:#04x}",
                msg,
                tag
            ),
        }

        self.stats.record_release();
    }

    /// Counters and current free-list lengths.
    pub fn stats(&self) -> PoolStats {
        let (fixed_free, irq_free) = {
            let lists = self.lists.lock_irqsave();
            (lists.fixed.len(), lists.irq.len())
        };
        self.stats.snapshot(fixed_free, irq_free)
    }

    /// Walks both free lists and checks every member.
    ///
    /// Each member must sit in this pool's slab, carry the tag of the list it
    /// is on, live in that list's part of the slab, and appear once. Interrupts
    /// stay off for the whole walk; this is a diagnostic, not a hot path.
    pub fn audit(&self) -> Result<PoolAudit> {
        let capacity = self.capacity();
        let mut seen = vec![false; capacity];

        let lists = self.lists.lock_irqsave();
        let mut counts = [0usize; 2];
        for (count, list) in counts.iter_mut().zip([&lists.fixed, &lists.irq]) {
            for msg in list.iter(capacity + 1) {
                let index = self.slot_of(msg).ok_or(MqError::ForeignMessage {
                    addr: msg.as_ptr() as usize,
                })?;
                // SAFETY: `slot_of` proved the pointer is inside our slab.
                let tag = unsafe { msg.as_ref().alloc_type };
                if AllocType::from_raw(tag) != Some(list.kind())
                    || self.home_of_slot(index) != list.kind()
                {
                    return Err(MqError::TagMismatch {
                        list: list.kind(),
                        index,
                        tag,
                    });
                }
                if core::mem::replace(&mut seen[index], true) {
                    return Err(MqError::DuplicateFree { index });
                }
                *count += 1;
            }
            if *count != list.len() {
                return Err(MqError::ListLengthMismatch {
                    list: list.kind(),
                    recorded: list.len(),
                    linked: *count,
                });
            }
        }
        drop(lists);

        let [fixed_free, irq_free] = counts;
        Ok(PoolAudit {
            fixed_free,
            irq_free,
            in_flight: capacity - fixed_free - irq_free,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of pre-allocated descriptors (fixed + irq).
    pub fn capacity(&self) -> usize {
        self.slab.len()
    }

    /// The heap serving dynamic descriptors.
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Identity stamped into every handle this pool issues.
    fn identity(&self) -> NonNull<()> {
        NonNull::from(self).cast()
    }

    /// Slab index of `msg`, if it is one of ours.
    fn slot_of(&self, msg: NonNull<MqMsg>) -> Option<usize> {
        let base = self.slab.cast::<MqMsg>().as_ptr() as usize;
        let offset = (msg.as_ptr() as usize).checked_sub(base)?;
        let index = offset / size_of::<MqMsg>();
        (offset % size_of::<MqMsg>() == 0 && index < self.capacity()).then_some(index)
    }

    /// The pool a slab slot belongs to.
    fn home_of_slot(&self, index: usize) -> AllocType {
        if index < self.config.fixed_msgs {
            AllocType::Fixed
        } else {
            AllocType::Irq
        }
    }

    fn home_of(&self, msg: NonNull<MqMsg>) -> Option<AllocType> {
        self.slot_of(msg).map(|index| self.home_of_slot(index))
    }
}

impl<H: KernelHeap> Drop for MsgPool<H> {
    fn drop(&mut self) {
        // Every `MsgBox` borrows the pool, so none is alive here.
        // SAFETY: `new` leaked exactly this boxed slice.
        drop(unsafe { Box::from_raw(self.slab.as_ptr()) });
    }
}

impl<H: KernelHeap> fmt::Debug for MsgPool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn pool(fixed: usize, irq: usize) -> MsgPool {
        MsgPool::with_global_heap(PoolConfig::new(fixed, irq)).unwrap()
    }

    #[test]
    fn slab_is_split_fixed_then_irq() {
        let pool = pool(3, 2);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(
            pool.audit(),
            Ok(PoolAudit {
                fixed_free: 3,
                irq_free: 2,
                in_flight: 0,
            })
        );

        let msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        let ptr = NonNull::from(&*msg);
        assert_eq!(pool.slot_of(ptr), Some(0));
        assert_eq!(pool.home_of(ptr), Some(AllocType::Fixed));
        pool.free_msg(msg);

        let msg = pool.alloc_msg_in(ExecContext::Interrupt).unwrap();
        assert_eq!(pool.slot_of(NonNull::from(&*msg)), Some(3));
        pool.free_msg(msg);
    }

    #[test]
    fn forged_tag_is_fatal_and_leaves_lists_alone() {
        let pool = pool(2, 2);
        let mut msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        msg.alloc_type = 0x5a;
        let before = pool.stats();

        let result = catch_unwind(AssertUnwindSafe(|| pool.free_msg(msg)));
        assert!(result.is_err());

        let after = pool.stats();
        assert_eq!(after.fixed_free, before.fixed_free);
        assert_eq!(after.irq_free, before.irq_free);
        assert_eq!(after.releases, before.releases);
        assert!(!pool.lists.is_locked());
        assert_eq!(pool.audit().map(|a| a.in_flight), Ok(1));
    }

    #[test]
    fn release_to_another_pool_is_fatal() {
        let a = pool(1, 1);
        let b = pool(1, 1);
        let before_a = a.stats();
        let before_b = b.stats();

        for ctx in [ExecContext::Task, ExecContext::Interrupt] {
            let msg = a.alloc_msg_in(ctx).unwrap();
            let result = catch_unwind(AssertUnwindSafe(|| b.free_msg(msg)));
            assert!(result.is_err(), "{ctx:?} descriptor accepted by a foreign pool");
        }

        let after_b = b.stats();
        assert_eq!(after_b.fixed_free, before_b.fixed_free);
        assert_eq!(after_b.irq_free, before_b.irq_free);
        assert_eq!(after_b.releases, 0);
        assert!(!b.lists.is_locked());
        assert_eq!(b.audit().map(|audit| audit.in_flight), Ok(0));

        // Both descriptors are stranded outside `a`, never linked into `b`.
        assert_eq!(a.stats().fixed_free, before_a.fixed_free - 1);
        assert_eq!(a.stats().irq_free, before_a.irq_free - 1);
        assert_eq!(a.audit().map(|audit| audit.in_flight), Ok(2));
    }

    #[test]
    fn dynamic_release_to_another_heap_is_fatal() {
        use crate::memory::heap::ArenaHeap;

        let global = pool(0, 0);
        let arena = MsgPool::new(PoolConfig::new(0, 0), ArenaHeap::with_capacity(512).unwrap())
            .unwrap();
        let held = arena.alloc_msg_in(ExecContext::Task).unwrap();
        let used = arena.heap().used();

        let msg = global.alloc_msg_in(ExecContext::Task).unwrap();
        assert_eq!(msg.alloc_type(), Some(AllocType::Dynamic));
        let result = catch_unwind(AssertUnwindSafe(|| arena.free_msg(msg)));
        assert!(result.is_err());
        assert_eq!(arena.heap().used(), used);
        assert_eq!(arena.stats().dynamic_in_use, 1);

        arena.free_msg(held);
        assert_eq!(arena.heap().used(), 0);
    }

    #[test]
    fn pooled_tag_on_wrong_slot_is_fatal() {
        let pool = pool(1, 1);
        let mut msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        msg.alloc_type = AllocType::Irq.as_raw();

        let result = catch_unwind(AssertUnwindSafe(|| pool.free_msg(msg)));
        assert!(result.is_err());
        assert_eq!(
            pool.audit(),
            Ok(PoolAudit {
                fixed_free: 0,
                irq_free: 1,
                in_flight: 1,
            })
        );
    }

    #[test]
    fn audit_catches_double_release() {
        let pool = pool(3, 1);
        let msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        let ptr = NonNull::from(&*msg);
        pool.free_msg(msg);

        // Simulate a caller releasing the same descriptor twice.
        unsafe { pool.lists.lock_irqsave().fixed.push_back(ptr) };
        assert_eq!(pool.audit(), Err(MqError::DuplicateFree { index: 0 }));
    }

    #[test]
    fn audit_catches_cut_chain() {
        let pool = pool(3, 0);
        let first = pool.alloc_msg_in(ExecContext::Task).unwrap();
        let ptr = NonNull::from(&*first);
        pool.free_msg(first);
        // List is now 1, 2, 0. Re-inserting 1 (not the tail) cuts off 2 and 0.
        let head = pool.lists.lock_irqsave().fixed.iter(1).next().unwrap();
        assert_ne!(head, ptr);
        unsafe { pool.lists.lock_irqsave().fixed.push_back(head) };

        assert!(matches!(
            pool.audit(),
            Err(MqError::DuplicateFree { .. }) | Err(MqError::ListLengthMismatch { .. })
        ));
    }

    #[test]
    fn audit_catches_tag_on_wrong_list() {
        let pool = pool(1, 1);
        let mut msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        msg.alloc_type = AllocType::Irq.as_raw();
        let ptr = msg.into_raw();
        // Bypass `free_msg` so its slot check does not fire first.
        unsafe { pool.lists.lock_irqsave().irq.push_back(ptr) };
        assert_eq!(
            pool.audit(),
            Err(MqError::TagMismatch {
                list: AllocType::Irq,
                index: 0,
                tag: AllocType::Irq.as_raw(),
            })
        );
    }

    #[test]
    fn dynamic_descriptor_is_fresh() {
        let pool = pool(0, 0);
        let mut msg = pool.alloc_msg_in(ExecContext::Task).unwrap();
        assert_eq!(msg.alloc_type(), Some(AllocType::Dynamic));
        assert!(msg.is_empty());
        assert_eq!(pool.slot_of(NonNull::from(&*msg)), None);
        msg.set_payload(b"heap").unwrap();
        pool.free_msg(msg);
        assert_eq!(pool.stats().dynamic_in_use, 0);
    }
}
