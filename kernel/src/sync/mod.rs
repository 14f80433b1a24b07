// =============================================================================
// mqkernel: Kernel Synchronization Primitives
// =============================================================================
//
// There is no std::sync in the kernel build. The pool needs one thing: a
// lock that task code and interrupt handlers can both take without ever
// deadlocking each other on the same core.
//
// Lock ordering:
//   Level 1 (innermost): arena heap mutex
//   Level 2: message pool free-list lock
//
// The pool never calls into the heap while holding its lock, so the two
// levels are never nested in practice. Keep it that way.
// =============================================================================

pub mod spinlock;
