//! The underlying allocator for the QEMU image: a bump allocator over the
//! monitored region, exported as the C `malloc`/`free` symbols the runtime
//! interposes on.
//!
//! Frees are not recycled; the scenarios allocate far less than the region
//! holds, and observing eviction only needs `free` to be callable.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

static NEXT: AtomicUsize = AtomicUsize::new(0);

fn region() -> (usize, usize) {
    // SAFETY: Provided by memory.x.
    unsafe extern "C" {
        static __shadowsan_app_start: u8;
        static __shadowsan_app_end: u8;
    }
    (
        (&raw const __shadowsan_app_start).expose_provenance(),
        (&raw const __shadowsan_app_end).expose_provenance(),
    )
}

#[unsafe(no_mangle)]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    let (start, end) = region();
    let size = (size + 7) & !7;

    let mut claimed = 0;
    let result = NEXT.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
        claimed = if next == 0 { start } else { next };
        let bumped = claimed.checked_add(size)?;
        (bumped <= end).then_some(bumped)
    });

    match result {
        Ok(_) => ptr::with_exposed_provenance_mut(claimed),
        Err(_) => ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn free(_ptr: *mut c_void) {}
