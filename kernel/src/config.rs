// =============================================================================
// mqkernel: Message Pool Configuration
// =============================================================================
//
// Pool sizes are fixed when the kernel is built. `PoolConfig` carries them
// into `MsgPool::new`; after construction nothing about the pools can be
// resized.
//
//   CONFIG_PREALLOC_MQ_MSGS      descriptors for task-context senders
//   CONFIG_PREALLOC_MQ_IRQ_MSGS  descriptors reserved for interrupt handlers;
//                                size it for the worst case of handlers that
//                                send concurrently
//   CONFIG_MQ_MAXMSGSIZE         inline payload bytes per descriptor
// =============================================================================

use static_assertions::const_assert;

use crate::error::{MqError, Result};

/// Number of descriptors pre-allocated for task-context senders.
pub const CONFIG_PREALLOC_MQ_MSGS: usize = 32;

/// Number of descriptors reserved for interrupt-context senders.
pub const CONFIG_PREALLOC_MQ_IRQ_MSGS: usize = 8;

/// Maximum payload carried inline by one descriptor.
pub const CONFIG_MQ_MAXMSGSIZE: usize = 32;

/// Upper bound on `fixed + irq` descriptors in one pool.
pub const MAX_POOL_MSGS: usize = u16::MAX as usize;

// Payload length is stored in a u16.
const_assert!(CONFIG_MQ_MAXMSGSIZE <= u16::MAX as usize);
const_assert!(CONFIG_PREALLOC_MQ_MSGS + CONFIG_PREALLOC_MQ_IRQ_MSGS <= MAX_POOL_MSGS);

/// Sizes of the two pre-allocated descriptor pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Descriptors in the fixed (task-context) pool.
    pub fixed_msgs: usize,
    /// Descriptors in the interrupt reserve pool.
    pub irq_msgs: usize,
}

impl PoolConfig {
    /// Pool sizes from the kernel configuration.
    pub const DEFAULT: Self = Self::new(CONFIG_PREALLOC_MQ_MSGS, CONFIG_PREALLOC_MQ_IRQ_MSGS);

    pub const fn new(fixed_msgs: usize, irq_msgs: usize) -> Self {
        Self {
            fixed_msgs,
            irq_msgs,
        }
    }

    /// Total pre-allocated descriptors, or `None` on overflow.
    pub const fn total(&self) -> Option<usize> {
        self.fixed_msgs.checked_add(self.irq_msgs)
    }

    /// Checks the sizes before any memory is committed.
    ///
    /// Either pool may be empty: with no fixed descriptors every task-context
    /// send goes to the heap, with no reserve interrupt handlers cannot send.
    pub fn validate(&self) -> Result<()> {
        match self.total() {
            Some(total) if total <= MAX_POOL_MSGS => Ok(()),
            _ => Err(MqError::InvalidConfig(
                "fixed + irq descriptors exceed MAX_POOL_MSGS",
            )),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
