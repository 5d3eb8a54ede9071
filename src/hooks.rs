//! The extern "C" callback surface expected by compiler instrumentation.
//!
//! Symbol names and argument shapes are externally imposed: instrumented
//! translation units emit calls to `__asan_loadN_noabort`/`__asan_storeN_noabort`
//! before every load and store, and pick up the allocator through
//! `__asan_malloc`/`__asan_free`. Only the logic behind the symbols is ours.
//!
//! Hooks invoked before [`crate::init`] pass accesses through and fall back
//! to the underlying allocator, so uninstrumented early boot behaves as if
//! the runtime were absent.

use core::ffi::c_void;

use crate::check::{AccessKind, Violation};
use crate::{report, with_runtime};

#[inline]
fn check(addr: usize, size: usize, kind: AccessKind) {
    if let Some(Err(violation)) = with_runtime(|rt| rt.check(addr, size, kind)) {
        report::access_violation(&violation);
    }
}

macro_rules! access_hooks {
    ($($load:ident, $store:ident, $size:expr;)*) => {
        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn $load(addr: *const c_void) {
                check(addr as usize, $size, AccessKind::Read);
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn $store(addr: *const c_void) {
                check(addr as usize, $size, AccessKind::Write);
            }
        )*
    };
}

access_hooks! {
    __asan_load1_noabort, __asan_store1_noabort, 1;
    __asan_load2_noabort, __asan_store2_noabort, 2;
    __asan_load4_noabort, __asan_store4_noabort, 4;
    __asan_load8_noabort, __asan_store8_noabort, 8;
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "C" fn __asan_loadN_noabort(addr: *const c_void, size: usize) {
    check(addr as usize, size, AccessKind::Read);
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub extern "C" fn __asan_storeN_noabort(addr: *const c_void, size: usize) {
    check(addr as usize, size, AccessKind::Write);
}

// Reporting entry points for abort-mode instrumentation: the compiler has
// already decided the access is bad, so these go straight to the reporter.

macro_rules! report_hooks {
    ($($load:ident, $store:ident, $size:expr;)*) => {
        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn $load(addr: *const c_void) -> ! {
                report::access_violation(&Violation {
                    addr: addr as usize,
                    size: $size,
                    kind: AccessKind::Read,
                });
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn $store(addr: *const c_void) -> ! {
                report::access_violation(&Violation {
                    addr: addr as usize,
                    size: $size,
                    kind: AccessKind::Write,
                });
            }
        )*
    };
}

report_hooks! {
    __asan_report_load1, __asan_report_store1, 1;
    __asan_report_load2, __asan_report_store2, 2;
    __asan_report_load4, __asan_report_store4, 4;
    __asan_report_load8, __asan_report_store8, 8;
}

#[unsafe(no_mangle)]
pub extern "C" fn __asan_report_load_n(addr: *const c_void, size: usize) -> ! {
    report::access_violation(&Violation {
        addr: addr as usize,
        size,
        kind: AccessKind::Read,
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn __asan_report_store_n(addr: *const c_void, size: usize) -> ! {
    report::access_violation(&Violation {
        addr: addr as usize,
        size,
        kind: AccessKind::Write,
    });
}

// Stubs for instrumentation this runtime does not support. Stack and global
// red zones are out of scope, so a call landing here means the translation
// unit was built with a heavier instrumentation level than the runtime
// handles; trap loudly rather than mischeck.

macro_rules! unsupported_hooks {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn $name($(_: $ty),*) {
                report::not_implemented(stringify!($name));
            }
        )*
    };
}

unsupported_hooks! {
    __asan_stack_malloc_1(size: usize, addr: *mut c_void);
    __asan_stack_malloc_2(size: usize, addr: *mut c_void);
    __asan_stack_malloc_3(size: usize, addr: *mut c_void);
    __asan_stack_malloc_4(size: usize, addr: *mut c_void);
    __asan_register_globals(globals: *mut c_void, n: usize);
    __asan_unregister_globals(globals: *mut c_void, n: usize);
    __asan_option_detect_stack_use_after_return();
}

/// The compiler emits this before every `noreturn` call even at the
/// instrumentation levels this runtime supports; trapping here would kill
/// legitimate aborts, so it is a no-op.
#[unsafe(no_mangle)]
pub extern "C" fn __asan_handle_no_return() {}

/// Interface-version handshake emitted by module constructors. This runtime
/// implements the v8 surface it is linked against, so there is nothing to
/// compare.
#[unsafe(no_mangle)]
pub extern "C" fn __asan_version_mismatch_check_v8() {}

#[cfg(feature = "replace-malloc-free")]
mod allocator {
    use core::ffi::c_void;

    use crate::alloc::SysHeap;
    use crate::{Heap, with_runtime_mut};

    /// `malloc` replacement for instrumented translation units.
    ///
    /// # Safety
    ///
    /// Standard `malloc` contract; callers on multi-core hosts must
    /// serialize with other runtime mutators.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn __asan_malloc(size: usize) -> *mut c_void {
        match with_runtime_mut(|rt| rt.malloc(size)) {
            Some(user) => user.cast(),
            // Runtime not up yet: plain allocation, untracked.
            None => unsafe { SysHeap.alloc(size).cast() },
        }
    }

    /// `free` replacement for instrumented translation units.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`__asan_malloc`] (or be null), and the same
    /// serialization requirement applies.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn __asan_free(ptr: *mut c_void) {
        if with_runtime_mut(|rt| rt.free(ptr.cast())).is_none() {
            // SAFETY: with the runtime down, `ptr` can only have come from
            // the fallback path above.
            unsafe { SysHeap.dealloc(ptr.cast()) };
        }
    }
}

/// C-ABI lifecycle shim for startup code that cannot call Rust directly.
/// Initialization failure is a configuration error and therefore fatal.
#[cfg(target_os = "none")]
#[unsafe(no_mangle)]
pub extern "C" fn shadowsan_init() {
    if let Err(err) = crate::init(crate::Config::default()) {
        report::init_failure(err);
    }
}

/// C-ABI shutdown shim: flushes the quarantine and tears the runtime down.
#[unsafe(no_mangle)]
pub extern "C" fn shadowsan_shutdown() {
    crate::shutdown();
}
