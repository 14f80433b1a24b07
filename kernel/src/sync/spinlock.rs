// =============================================================================
// mqkernel: IRQ-Safe Ticket Spinlock
// =============================================================================
//
// The free lists of the message pool are touched from task context and from
// interrupt handlers, on any core. This lock serializes all of them.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//   Waiters are served in arrival order, so a handler spinning on another
//   core waits a bounded time proportional to the number of waiters.
//
// IRQ SAFETY:
//   Interrupts on the current core are disabled BEFORE taking a ticket.
//   Otherwise:
//     1. A task holds the pool lock with interrupts enabled
//     2. An interrupt fires on the same core
//     3. The handler tries to take the pool lock
//     4. DEADLOCK: the handler spins on a lock held by the task it
//        preempted, and that task cannot run until the handler returns
//
//   The saved state travels inside the guard, so nested acquisitions and
//   acquisitions from code that already runs with interrupts off restore
//   exactly what they found.
// =============================================================================

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{self, IrqFlags};

/// A ticket spinlock that disables local interrupts while held.
///
/// # Examples
/// ```
/// use mqkernel::IrqSpinLock;
///
/// static COUNTER: IrqSpinLock<u64> = IrqSpinLock::new(0);
///
/// {
///     let mut guard = COUNTER.lock_irqsave();
///     *guard += 1;
/// } // Lock released and interrupt state restored here
/// assert_eq!(*COUNTER.lock_irqsave(), 1);
/// ```
pub struct IrqSpinLock<T> {
    /// The next ticket to be dispensed.
    next_ticket: AtomicU32,

    /// The ticket currently allowed into the critical section.
    now_serving: AtomicU32,

    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out access to `T` to one core at a time, so sharing
// the lock is sound whenever `T` may move between cores.
unsafe impl<T: Send> Send for IrqSpinLock<T> {}
unsafe impl<T: Send> Sync for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates an unlocked spinlock. Usable in statics.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Disables local interrupts, then spins until the lock is ours.
    ///
    /// Dropping the returned guard releases the lock first and then puts the
    /// interrupt flag back the way it was found.
    pub fn lock_irqsave(&self) -> IrqSpinLockGuard<'_, T> {
        let flags = arch::local_irq_save();

        // Relaxed is enough for taking the ticket; the Acquire load in the
        // spin loop orders the critical section.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            arch::cpu_relax();
        }

        IrqSpinLockGuard { lock: self, flags }
    }

    /// Takes the lock only if it is free right now.
    ///
    /// On failure the interrupt state is restored before returning.
    pub fn try_lock_irqsave(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let flags = arch::local_irq_save();

        let current = self.now_serving.load(Ordering::Relaxed);
        match self.next_ticket.compare_exchange(
            current,
            current.wrapping_add(1),
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Some(IrqSpinLockGuard { lock: self, flags }),
            Err(_) => {
                arch::local_irq_restore(flags);
                None
            }
        }
    }

    /// Whether some core holds or waits for the lock. Diagnostic only; the
    /// answer may be stale by the time it is read.
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }

    /// Exclusive access without locking; `&mut self` already proves it.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T> fmt::Debug for IrqSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqSpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard for a held [`IrqSpinLock`].
///
/// While it exists the holder has exclusive access to the data and local
/// interrupts stay disabled.
pub struct IrqSpinLockGuard<'a, T> {
    lock: &'a IrqSpinLock<T>,

    /// Interrupt state from before the lock was taken.
    flags: IrqFlags,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves we hold the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves we hold the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes our writes to the next ticket holder.
        self.lock.now_serving.fetch_add(1, Ordering::Release);
        arch::local_irq_restore(self.flags);
    }
}
