// =============================================================================
// mqkernel: Kernel Utilities
// =============================================================================
//
//   panic.rs  fatal diagnostics (`fatal!`) and the optional panic handler
//
// Logging goes through the `log` facade; the kernel image installs the sink
// (serial, framebuffer) before calling into this crate.
// =============================================================================

pub mod panic;
