//! @expect: clean
//!
//! Init, allocation churn, shutdown (flushing the quarantine), and a second
//! init. Also proves double-init is rejected rather than clobbering state.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config::default()).unwrap();
    assert_eq!(
        shadowsan::init(shadowsan::Config::default()),
        Err(shadowsan::InitError::AlreadyInitialized)
    );

    for size in [8usize, 16, 48] {
        let p = asan::malloc(size);
        // SAFETY: In bounds while live; freed exactly once.
        unsafe {
            asan::store1(p, 0xEE);
            asan::store1(p.add(size - 1), 0xEE);
            asan::free(p);
        }
    }

    shadowsan::shutdown();
    defmt::info!("shutdown flushed the quarantine");

    shadowsan::init(shadowsan::Config::default()).unwrap();
    let p = asan::malloc(32);
    // SAFETY: In bounds while live; freed exactly once.
    unsafe {
        asan::store1(p, 0x11);
        asan::free(p);
    }

    defmt::info!("lifecycle completed");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
