//! @expect: fault
//!
//! A freed block stays poisoned through unrelated allocation churn while it
//! sits in quarantine, so a stale pointer still faults several frees later.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config::default()).unwrap();

    let p = asan::malloc(8);
    // SAFETY: p came from malloc and is freed exactly once.
    unsafe { asan::free(p) };

    // Unrelated churn, well below the quarantine capacity.
    for size in [24usize, 40] {
        let q = asan::malloc(size);
        // SAFETY: In bounds while live; freed exactly once.
        unsafe {
            asan::store1(q, 1);
            asan::free(q);
        }
    }
    defmt::info!("reading a block freed 3 frees ago");

    // SAFETY: The load targets quarantined memory; the checker reports and
    // aborts before the read happens.
    unsafe { asan::load1(p) };

    defmt::error!("stale pointer survived the quarantine window");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
