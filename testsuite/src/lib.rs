//! Support code for the QEMU scenario programs.
//!
//! Each example in `examples/` exercises one detection scenario against the
//! real extern "C" hook surface, exactly as an instrumented translation
//! unit would: check callback first, then the actual memory access.

#![no_std]

pub mod asan;
mod heap;
mod logger;

// Links the critical-section implementation for the single-core target.
use cortex_m as _;
use cortex_m_semihosting::debug::{self, EXIT_FAILURE, EXIT_SUCCESS};

pub use cortex_m_rt::entry;

pub fn exit_success() -> ! {
    debug::exit(EXIT_SUCCESS);
    #[allow(clippy::empty_loop)]
    loop {}
}

pub fn exit_failure() -> ! {
    debug::exit(EXIT_FAILURE);
    #[allow(clippy::empty_loop)]
    loop {}
}
