//! @expect: fault
//!
//! Load through a dangling pointer right after free must be fatal.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config::default()).unwrap();

    let p = asan::malloc(8);
    // SAFETY: In bounds while the block is live.
    unsafe { asan::store1(p, 0x42) };
    // SAFETY: p came from malloc and is freed exactly once.
    unsafe { asan::free(p) };
    defmt::info!("reading through the dangling pointer");

    // SAFETY: The load targets freed memory; the checker reports and
    // aborts before the read happens.
    unsafe { asan::load1(p) };

    defmt::error!("use-after-free was not detected");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
