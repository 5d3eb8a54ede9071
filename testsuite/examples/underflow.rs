//! @expect: fault
//!
//! One-byte store just before an allocation lands in the leading red zone
//! and must be fatal.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config::default()).unwrap();

    let p = asan::malloc(16);
    defmt::info!("writing one byte before a 16-byte block");

    // SAFETY: The store targets the red zone; the checker reports and
    // aborts before the write happens.
    unsafe { asan::store1(p.sub(1), 0xFF) };

    defmt::error!("underflow was not detected");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
