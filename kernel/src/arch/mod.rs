// =============================================================================
// mqkernel: Architecture Seam
// =============================================================================
//
// The pool needs exactly three things from the CPU:
//   1. Save the local interrupt-enable state and disable interrupts.
//   2. Restore that saved state later (only re-enabling if it was enabled).
//   3. Tell whether the current code runs in interrupt context.
//
// BACKENDS:
//   - x86_64 bare metal: the real RFLAGS.IF via the `x86_64` crate, and a
//     per-core interrupt nesting counter maintained by irq_enter/irq_exit,
//     kept in a GS-addressed CoreLocal (see init_core_local).
//   - hosted (any target with an OS): a per-thread shadow of the interrupt
//     flag and nesting depth. A thread that calls `handle_interrupt` behaves
//     like an interrupt handler preempting a task, which is how the tests
//     simulate interrupt load.
// =============================================================================

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use self::x86_64::cpu as backend;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::cpu::{halt_forever, init_core_local, MAX_CORES};

#[cfg(not(target_os = "none"))]
mod hosted;
#[cfg(not(target_os = "none"))]
use self::hosted as backend;

#[cfg(all(target_os = "none", not(target_arch = "x86_64")))]
compile_error!("mqkernel: no interrupt-control backend for this architecture");

/// Local interrupt-enable state captured by [`local_irq_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "saved interrupt state must be handed back to local_irq_restore"]
pub struct IrqFlags {
    enabled: bool,
}

impl IrqFlags {
    /// Whether interrupts were enabled when this state was saved.
    #[inline]
    pub const fn were_enabled(self) -> bool {
        self.enabled
    }
}

/// Saves the local interrupt state and disables interrupts on this core.
#[inline]
pub fn local_irq_save() -> IrqFlags {
    let enabled = backend::irqs_enabled();
    backend::irq_disable();
    IrqFlags { enabled }
}

/// Restores the state captured by [`local_irq_save`].
///
/// Interrupts are re-enabled only if they were enabled at save time, so
/// nested save/restore pairs unwind correctly.
#[inline]
pub fn local_irq_restore(flags: IrqFlags) {
    if flags.enabled {
        backend::irq_enable();
    }
}

/// Whether maskable interrupts are currently enabled on this core.
#[inline]
pub fn irqs_enabled() -> bool {
    backend::irqs_enabled()
}

/// Whether the caller is running inside an interrupt handler.
#[inline]
pub fn in_interrupt() -> bool {
    backend::irq_depth() > 0
}

/// Body of a spin-wait loop.
#[inline]
pub fn cpu_relax() {
    backend::cpu_relax();
}

/// Marks entry into an interrupt handler. Called from trap entry.
#[inline]
pub fn irq_enter() {
    backend::irq_depth_add(1);
}

/// Marks exit from an interrupt handler. Called from trap exit.
#[inline]
pub fn irq_exit() {
    backend::irq_depth_add(-1);
}

/// Runs `f` as an interrupt handler: interrupts off and the nesting depth
/// raised for its duration, both restored on every exit path.
pub fn handle_interrupt<R>(f: impl FnOnce() -> R) -> R {
    struct IrqFrame {
        flags: IrqFlags,
    }

    impl Drop for IrqFrame {
        fn drop(&mut self) {
            irq_exit();
            local_irq_restore(self.flags);
        }
    }

    let frame = IrqFrame {
        flags: local_irq_save(),
    };
    irq_enter();
    let result = f();
    drop(frame);
    result
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn save_restore_nests() {
        assert!(irqs_enabled());
        let outer = local_irq_save();
        assert!(!irqs_enabled());
        let inner = local_irq_save();
        assert!(!inner.were_enabled());
        local_irq_restore(inner);
        assert!(!irqs_enabled());
        local_irq_restore(outer);
        assert!(irqs_enabled());
    }

    #[test]
    fn handle_interrupt_sets_context() {
        assert!(!in_interrupt());
        let seen = handle_interrupt(|| (in_interrupt(), irqs_enabled()));
        assert_eq!(seen, (true, false));
        assert!(!in_interrupt());
        assert!(irqs_enabled());
    }

    #[test]
    fn nested_interrupts_unwind() {
        handle_interrupt(|| {
            handle_interrupt(|| assert!(in_interrupt()));
            assert!(in_interrupt());
        });
        assert!(!in_interrupt());
    }

    #[test]
    fn panicking_handler_restores_state() {
        let result = std::panic::catch_unwind(|| handle_interrupt(|| panic!("handler fault")));
        assert!(result.is_err());
        assert!(!in_interrupt());
        assert!(irqs_enabled());
    }
}
