// =============================================================================
// mqkernel: Fatal Diagnostics
// =============================================================================
//
// Some states have no safe continuation. A message descriptor whose
// allocation tag names no pool means kernel memory was overwritten or a
// descriptor was forged; touching a free list afterwards could spread the
// damage into unrelated kernel state. Such paths call `fatal!`, which never
// returns.
//
// WHAT HAPPENS:
//   1. The diagnostic is logged at error level
//   2. The kernel panics with the same message
//   3. With the `panic-handler` feature on a bare-metal build, the handler
//      below prints location + message and halts the core forever
//
// On hosted builds the panic unwinds normally, so tests can observe the
// fatal path with `catch_unwind`.
// =============================================================================

use core::fmt;

/// Reports an unrecoverable invariant violation and stops.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    log::error!("FATAL: {}", args);
    panic!("{}", args)
}

/// Reports an unrecoverable invariant violation, `format!`-style.
///
/// # Examples
/// ```should_panic
/// mqkernel::fatal!("free list corrupt at slot {}", 3);
/// ```
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::util::panic::fatal(format_args!($($arg)*))
    };
}

/// The kernel panic handler: log, then halt this core.
#[cfg(all(target_os = "none", feature = "panic-handler"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("==========================================================");
    log::error!("  KERNEL PANIC");
    match info.location() {
        Some(location) => log::error!("  Location: {}:{}", location.file(), location.line()),
        None => log::error!("  Location: <unknown>"),
    }
    log::error!("  Message: {}", info.message());
    log::error!("  System halted. Reboot required.");
    log::error!("==========================================================");

    crate::arch::halt_forever()
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "descriptor 7 corrupt")]
    fn fatal_panics_with_message() {
        crate::fatal!("descriptor {} corrupt", 7);
    }
}
