//! @expect: clean
//!
//! Addresses outside the monitored region pass every check regardless of
//! shadow state, even under the strict policy where the whole shadow starts
//! poisoned. Stack and peripheral traffic must go unperturbed.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config {
        policy: shadowsan::InitPolicy::Strict,
        ..shadowsan::Config::default()
    })
    .unwrap();

    let mut on_stack = [0u8; 16];
    defmt::info!("touching the stack under a fully poisoned shadow");

    // SAFETY: A live stack array, outside the monitored region.
    unsafe {
        asan::store1(on_stack.as_mut_ptr(), 0x77);
        let v = asan::load1(on_stack.as_ptr());
        defmt::info!("stack byte read back: {=u8:#x}", v);
    }

    defmt::info!("unmonitored accesses passed");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
