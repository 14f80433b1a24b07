//! Error types for the message pool.

use crate::mqueue::AllocType;

/// Result type alias for pool operations.
pub type Result<T> = core::result::Result<T, MqError>;

/// Everything that can go wrong in the pool short of memory corruption,
/// which is fatal and never surfaces as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MqError {
    /// The process-wide pool has not been created yet.
    #[error("message pool not initialized")]
    NotInitialized,

    /// `initialize` ran a second time.
    #[error("message pool already initialized")]
    AlreadyInitialized,

    /// Interrupt context found the reserve pool empty. The handler must drop
    /// the message; interrupt context never falls back to the heap.
    #[error("interrupt reserve pool exhausted")]
    IrqPoolExhausted,

    /// Task context found the fixed pool empty and the heap refused too.
    #[error("out of memory: fixed pool empty and heap allocation failed")]
    OutOfMemory,

    /// Payload does not fit in a descriptor.
    #[error("payload of {len} bytes exceeds message capacity of {max}")]
    MessageTooLong { len: usize, max: usize },

    /// Pool sizing rejected before any memory was committed.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),

    /// A free list holds a descriptor stamped for a different pool.
    #[error("descriptor {index} on the {list:?} free list carries alloc type {tag:#04x}")]
    TagMismatch {
        list: AllocType,
        index: usize,
        tag: u8,
    },

    /// A free list holds a descriptor outside this pool's slab.
    #[error("descriptor at {addr:#x} on a free list does not belong to this pool")]
    ForeignMessage { addr: usize },

    /// A descriptor is linked into the free lists more than once.
    #[error("descriptor {index} is on a free list more than once")]
    DuplicateFree { index: usize },

    /// Walking a free list reached a different number of members than the
    /// list has recorded; a double release cut or looped the chain.
    #[error("{list:?} free list records {recorded} descriptors but links {linked}")]
    ListLengthMismatch {
        list: AllocType,
        recorded: usize,
        linked: usize,
    },
}
