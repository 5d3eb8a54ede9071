//! Bindings to the runtime's C-ABI surface, seen the way an instrumented
//! translation unit sees it: by symbol, not by Rust path.

use core::ffi::c_void;

unsafe extern "C" {
    fn __asan_malloc(size: usize) -> *mut c_void;
    fn __asan_free(ptr: *mut c_void);
    fn __asan_load1_noabort(addr: *const c_void);
    fn __asan_store1_noabort(addr: *const c_void);
    fn __asan_load8_noabort(addr: *const c_void);
    fn __asan_store8_noabort(addr: *const c_void);
}

pub fn malloc(size: usize) -> *mut u8 {
    // SAFETY: Plain allocation request.
    unsafe { __asan_malloc(size).cast() }
}

/// # Safety
///
/// `ptr` must have come from [`malloc`] and not been freed since.
pub unsafe fn free(ptr: *mut u8) {
    // SAFETY: Forwarded caller contract.
    unsafe { __asan_free(ptr.cast()) }
}

/// A 1-byte instrumented store: check callback, then the real write. On a
/// violation the callback reports and never returns.
///
/// # Safety
///
/// If the checker passes the access, `ptr` is actually written.
pub unsafe fn store1(ptr: *mut u8, value: u8) {
    // SAFETY: The callback takes any address; the write only happens once
    // the checker has accepted it, per the caller's contract.
    unsafe {
        __asan_store1_noabort(ptr.cast());
        ptr.write_volatile(value);
    }
}

/// A 1-byte instrumented load.
///
/// # Safety
///
/// If the checker passes the access, `ptr` is actually read.
pub unsafe fn load1(ptr: *const u8) -> u8 {
    // SAFETY: See `store1`.
    unsafe {
        __asan_load1_noabort(ptr.cast());
        ptr.read_volatile()
    }
}

/// An 8-byte instrumented store.
///
/// # Safety
///
/// `ptr` must be 8-aligned; if the checker passes, it is written.
pub unsafe fn store8(ptr: *mut u64, value: u64) {
    // SAFETY: See `store1`; alignment per the caller's contract.
    unsafe {
        __asan_store8_noabort(ptr.cast());
        ptr.write_volatile(value);
    }
}

/// An 8-byte instrumented load.
///
/// # Safety
///
/// `ptr` must be 8-aligned; if the checker passes, it is read.
pub unsafe fn load8(ptr: *const u64) -> u64 {
    // SAFETY: See `load1`.
    unsafe {
        __asan_load8_noabort(ptr.cast());
        ptr.read_volatile()
    }
}
