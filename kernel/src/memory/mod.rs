//! Kernel memory services consumed by the message pool.
//!
//! Only the heap boundary lives here: the pool allocates its descriptor slab
//! once at initialization and takes dynamic descriptors from the heap when
//! the fixed pool runs dry.

pub mod heap;
