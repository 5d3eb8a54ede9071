//! Fatal diagnostics.
//!
//! Every confirmed error is terminal: one log line, then abort. There is no
//! retry and no local recovery anywhere in the runtime.

use crate::check::Violation;

/// Report a shadow-detected access violation and abort.
pub(crate) fn access_violation(v: &Violation) -> ! {
    defmt::error!(
        "ASAN: addr {=usize:#x}, {=str}, size {=usize}",
        v.addr,
        v.kind.as_str(),
        v.size
    );
    abort();
}

/// An instrumentation callback fired that this runtime does not support.
/// Distinguishable from an access violation so the instrumentation level
/// mismatch is obvious in the log.
pub(crate) fn not_implemented(symbol: &'static str) -> ! {
    defmt::error!("ASAN: unsupported instrumentation callback {=str}", symbol);
    abort();
}

/// Initialization failed from the C-ABI entry point, which has no way to
/// surface a `Result`.
#[cfg(target_os = "none")]
pub(crate) fn init_failure(err: crate::InitError) -> ! {
    defmt::error!("ASAN: init failed: {}", err);
    abort();
}

/// Terminate the process.
///
/// Under `qemu-test` this exits through semihosting so the harness observes
/// a failing exit code; otherwise it lands in the application's panic
/// handler, which on bare metal is the closest thing to `abort(3)`.
fn abort() -> ! {
    #[cfg(feature = "qemu-test")]
    {
        cortex_m_semihosting::debug::exit(cortex_m_semihosting::debug::EXIT_FAILURE);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    #[cfg(not(feature = "qemu-test"))]
    panic!("shadowsan: fatal memory error");
}
