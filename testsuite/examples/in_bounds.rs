//! @expect: clean
//!
//! Accesses inside a live allocation: first byte, last byte, and full-width
//! loads and stores. None of them may report.

#![no_std]
#![no_main]

use testsuite::{asan, entry, exit_failure, exit_success};

#[entry]
fn main() -> ! {
    shadowsan::init(shadowsan::Config::default()).unwrap();

    let p = asan::malloc(16);
    defmt::info!("allocated 16 bytes at {=usize:#x}", p as usize);

    // SAFETY: p points to a live 16-byte allocation; all offsets are in
    // bounds and 8-aligned where required.
    unsafe {
        asan::store1(p, 0xA5);
        asan::store1(p.add(15), 0x5A);
        asan::store8(p.cast(), 0x0123_4567_89AB_CDEF);
        let lo = asan::load8(p.cast());
        let hi = asan::load1(p.add(15));
        defmt::info!("read back {=u64:#x} / {=u8:#x}", lo, hi);
        asan::free(p);
    }

    defmt::info!("in-bounds accesses passed");
    exit_success();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    exit_failure();
}
