//! Message-queue descriptor pools.
//!
//! The queue send path acquires a descriptor, fills it, and queues it; the
//! receive path (or queue cleanup) releases it once the message has been
//! consumed. Nothing else sits between producers and the pool.
//!
//! The kernel keeps one pool for the whole system. It is created by
//! [`initialize`] during boot, before any interrupt handler that sends
//! messages is enabled, and then lives until power-off.
//!
//! ```
//! use mqkernel::{mqueue, PoolConfig};
//!
//! mqueue::initialize(PoolConfig::default())?;
//!
//! let mut msg = mqueue::alloc_msg()?;
//! msg.set_priority(3);
//! msg.set_payload(b"sensor:42")?;
//! // ... queued, received ...
//! mqueue::free_msg(msg);
//! # Ok::<(), mqkernel::MqError>(())
//! ```

mod freelist;
mod msg;
mod pool;
mod stats;

use spin::Once;

use crate::arch;
use crate::config::PoolConfig;
use crate::error::{MqError, Result};

pub use msg::{AllocType, MqMsg, MsgBox, MQ_MAX_BYTES};
pub use pool::{MsgPool, PoolAudit};
pub use stats::PoolStats;

/// Which acquisition policy applies to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// Ordinary task (thread) context: fixed pool, then heap.
    Task,
    /// Interrupt handler: reserve pool only.
    Interrupt,
}

impl ExecContext {
    /// Context of the calling code.
    pub fn current() -> Self {
        if arch::in_interrupt() {
            Self::Interrupt
        } else {
            Self::Task
        }
    }
}

/// The system-wide pool.
static MSG_POOL: Once<MsgPool> = Once::new();

/// Creates the system-wide pool.
///
/// Call exactly once during boot, before enabling interrupt handlers that
/// send messages. A second call fails with [`MqError::AlreadyInitialized`]
/// and leaves the existing pool untouched.
pub fn initialize(config: PoolConfig) -> Result<&'static MsgPool> {
    let mut constructed = false;
    let pool = MSG_POOL.try_call_once(|| {
        constructed = true;
        MsgPool::with_global_heap(config)
    })?;

    if !constructed {
        log::warn!("mqueue: initialize called twice; keeping the first pool");
        return Err(MqError::AlreadyInitialized);
    }
    Ok(pool)
}

/// The system-wide pool, once [`initialize`] has run.
pub fn msg_pool() -> Result<&'static MsgPool> {
    MSG_POOL.get().ok_or(MqError::NotInitialized)
}

/// Acquires a descriptor from the system-wide pool for the calling context.
pub fn alloc_msg() -> Result<MsgBox<'static>> {
    msg_pool()?.alloc_msg()
}

/// Releases a descriptor to the system-wide pool.
pub fn free_msg(msg: MsgBox<'static>) {
    match MSG_POOL.get() {
        Some(pool) => pool.free_msg(msg),
        // A `'static` handle can only have come from the global pool.
        None => crate::fatal!("mqueue: free_msg before initialize"),
    }
}
