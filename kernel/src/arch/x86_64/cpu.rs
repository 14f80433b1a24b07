// =============================================================================
// mqkernel: x86_64 CPU Interrupt Control
// =============================================================================
//
// Interrupt flag access goes through the `x86_64` crate, which compiles to a
// single PUSHFQ/CLI/STI each. Interrupt nesting is tracked in a per-core
// `CoreLocal` block that GS points at; trap entry/exit stubs call
// irq_enter()/irq_exit() around every handler.
//
// CORE BRING-UP:
//   The embedding kernel assigns each core a dense index (0 = BSP) and calls
//   init_core_local(index) on that core before enabling its interrupts.
//   Until the first call anywhere, every access resolves to slot 0, so the
//   BSP may use the pool during early boot without it.
// =============================================================================

use core::arch::asm;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ::x86_64::instructions::{hlt, interrupts};

use crate::error::{MqError, Result};

/// Maximum supported cores (N3710 has 4).
pub const MAX_CORES: usize = 4;

const IA32_GS_BASE: u32 = 0xC000_0101;
const IA32_KERNEL_GS_BASE: u32 = 0xC000_0102;

/// Per-core state reached through GS.
///
/// `core_id` MUST stay at offset 0 for the GS-relative read in `core_id()`.
#[repr(C, align(64))]
pub struct CoreLocal {
    core_id: u32,
    /// Interrupt nesting depth on this core.
    irq_depth: AtomicU32,
}

impl CoreLocal {
    const fn new(core_id: u32) -> Self {
        Self {
            core_id,
            irq_depth: AtomicU32::new(0),
        }
    }
}

static CORE_LOCALS: [CoreLocal; MAX_CORES] = [
    CoreLocal::new(0),
    CoreLocal::new(1),
    CoreLocal::new(2),
    CoreLocal::new(3),
];

/// Set once any core has pointed GS at its `CoreLocal`.
static GS_READY: AtomicBool = AtomicBool::new(false);

#[inline]
unsafe fn wrmsr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    unsafe {
        asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") low,
            in("edx") high,
            options(nomem, nostack, preserves_flags)
        );
    }
}

/// Points this core's GS base at `CORE_LOCALS[core]`.
///
/// # Safety
/// Must run on the core that `core` names, once, before that core enables
/// interrupts or touches a message pool. Nothing else on the core may own
/// the GS base. Two cores must never pass the same index.
pub unsafe fn init_core_local(core: usize) -> Result<()> {
    let local = CORE_LOCALS
        .get(core)
        .ok_or(MqError::InvalidConfig("core index exceeds MAX_CORES"))?;
    let addr = local as *const CoreLocal as u64;
    unsafe {
        wrmsr(IA32_GS_BASE, addr);
        wrmsr(IA32_KERNEL_GS_BASE, addr);
    }
    GS_READY.store(true, Ordering::Release);
    log::info!("arch: core {} CoreLocal at {:#x}", core, addr);
    Ok(())
}

/// Dense index of the executing core.
#[inline]
fn core_id() -> usize {
    if !GS_READY.load(Ordering::Acquire) {
        return 0;
    }
    let id: u32;
    // SAFETY: once GS_READY is set, every core that may run this has had
    // its GS base pointed at a `CoreLocal` (see `init_core_local`).
    unsafe {
        asm!(
            "mov {:e}, gs:[0]",
            out(reg) id,
            options(readonly, nostack, preserves_flags)
        );
    }
    id as usize
}

#[inline]
fn local() -> &'static CoreLocal {
    &CORE_LOCALS[core_id()]
}

#[inline]
pub(in crate::arch) fn irqs_enabled() -> bool {
    interrupts::are_enabled()
}

#[inline]
pub(in crate::arch) fn irq_disable() {
    interrupts::disable();
}

#[inline]
pub(in crate::arch) fn irq_enable() {
    interrupts::enable();
}

#[inline]
pub(in crate::arch) fn irq_depth() -> u32 {
    local().irq_depth.load(Ordering::Relaxed)
}

#[inline]
pub(in crate::arch) fn irq_depth_add(delta: i32) {
    let depth = &local().irq_depth;
    if delta >= 0 {
        depth.fetch_add(delta as u32, Ordering::Relaxed);
    } else {
        depth.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
    }
}

/// PAUSE: hints the core that it is spinning, easing bus contention.
#[inline]
pub(in crate::arch) fn cpu_relax() {
    core::hint::spin_loop();
}

/// Halts this core permanently: interrupts off, then HLT in a loop.
///
/// The loop guards against NMIs, which still wake a halted core.
pub fn halt_forever() -> ! {
    interrupts::disable();
    loop {
        hlt();
    }
}
