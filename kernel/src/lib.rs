// =============================================================================
// mqkernel: Crate Root
// =============================================================================
//
// This crate is the message-buffer lifecycle manager of the kernel's message
// queue facility: three pools of message descriptors (fixed, interrupt
// reserve, dynamic) and the rule that sends each released descriptor back to
// where it came from.
//
// Everything the pool needs from the rest of the kernel lives next to it:
//   arch    local interrupt save/restore, interrupt-context detection
//   sync    ticket spinlock that disables interrupts while held
//   memory  the kernel heap boundary (`kmm_malloc` / `kmm_free`)
//   util    fatal diagnostics and the optional panic handler
//   mqueue  descriptors, free lists, the pool manager and its singleton
//
// BUILD MODES:
//   - target_os = "none": `#![no_std]` + `alloc`. This is the kernel build.
//   - hosted targets: std is linked and the arch layer simulates interrupts
//     per thread, so every property of the pool can be tested on a host.
// =============================================================================

#![cfg_attr(target_os = "none", no_std)]

// Descriptor slabs and dynamic descriptors live on the kernel heap.
extern crate alloc;

/// Architecture seam: interrupt flag control and context detection.
pub mod arch;

/// Build-time sizing of the descriptor pools.
pub mod config;

/// Error type shared by every fallible operation in the crate.
pub mod error;

/// Kernel heap boundary used for the pool slab and dynamic descriptors.
pub mod memory;

/// Message descriptors and the pool manager.
pub mod mqueue;

/// Synchronization primitives.
pub mod sync;

/// Fatal error reporting and the panic handler.
pub mod util;

pub use config::PoolConfig;
pub use error::{MqError, Result};
pub use memory::heap::{ArenaHeap, GlobalHeap, KernelHeap};
pub use mqueue::{AllocType, ExecContext, MqMsg, MsgBox, MsgPool, PoolAudit, PoolStats};
pub use sync::spinlock::{IrqSpinLock, IrqSpinLockGuard};
