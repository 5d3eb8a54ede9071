#![no_std]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Range;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

mod alloc;
mod check;
mod hooks;
mod quarantine;
mod report;
mod shadow;

pub use alloc::SysHeap;
pub use check::{AccessKind, Violation};
pub use shadow::GRANULE;

use quarantine::Quarantine;
use shadow::ShadowMap;

/// Red-zone width in bytes on each side of an allocation, unless overridden
/// in [`Config`]. Two granules catch every small overflow while keeping the
/// per-allocation overhead modest.
pub const DEFAULT_RED_ZONE: usize = 16;

/// Number of freed blocks the process-wide runtime holds in quarantine
/// before they reach the underlying allocator.
pub const QUARANTINE_CAPACITY: usize = 8;

/// Initial state of the shadow map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InitPolicy {
    /// Everything starts valid; only red zones and freed blocks are ever
    /// poisoned. Unknown memory passes checks.
    Permissive,
    /// Everything starts poisoned. The caller must [`unpoison`] legitimate
    /// static regions (data, bss) before instrumented code touches them.
    Strict,
}

/// Runtime configuration. The monitored region and shadow placement come
/// from the linker (see the crate docs); everything else is set here.
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct Config {
    /// Bytes of poisoned red zone on each side of an allocation. Must be a
    /// multiple of 8 and at least `size_of::<usize>()`, so the size slot
    /// fits in the leading zone.
    pub red_zone: usize,
    /// Initial shadow state.
    pub policy: InitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            red_zone: DEFAULT_RED_ZONE,
            policy: InitPolicy::Permissive,
        }
    }
}

/// Error returned when constructing a runtime fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InitError {
    /// The process-wide runtime is already up.
    AlreadyInitialized,
    /// Monitored region is empty, misaligned, or not a multiple of 8 bytes
    /// long.
    BadAppRegion,
    /// `red_zone` is not a multiple of 8 or too small to hold the size slot.
    BadRedZone,
    /// The shadow buffer is smaller than one eighth of the monitored region.
    ShadowTooSmall,
    /// The shadow buffer lies inside the monitored region; its own updates
    /// would trip (or corrupt) the checks.
    ShadowOverlapsApp,
}

/// Seam to the allocator being interposed.
///
/// The process-wide runtime uses [`SysHeap`] (the C `malloc`/`free`
/// symbols); tests substitute arena-backed implementations.
pub trait Heap {
    /// Allocate `size` bytes.
    ///
    /// # Safety
    ///
    /// Must return null or a block of at least `size` bytes, 8-aligned.
    unsafe fn alloc(&mut self, size: usize) -> *mut u8;

    /// Release a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `alloc` on this heap and not been released
    /// since.
    unsafe fn dealloc(&mut self, ptr: *mut u8);
}

/// One sanitizer runtime: shadow map, quarantine and the heap it wraps.
///
/// The process normally holds a single instance behind [`init`], but the
/// type is freely constructible over arbitrary buffers so tests can build
/// and discard isolated runtimes per case.
pub struct Asan<'a, H: Heap> {
    pub(crate) shadow: ShadowMap<'a>,
    pub(crate) quarantine: Quarantine<'a>,
    pub(crate) heap: H,
    pub(crate) red_zone: usize,
}

impl<'a, H: Heap> Asan<'a, H> {
    /// Build a runtime monitoring `app`, with shadow state in `shadow` and
    /// quarantine slots in `quarantine_slots` (empty disables the ring).
    ///
    /// Validates the configuration and fills the shadow per
    /// [`Config::policy`]. The heap must hand out blocks inside `app` for
    /// allocations to be tracked; blocks outside are simply not monitored.
    pub fn new(
        shadow: &'a mut [u8],
        app: Range<usize>,
        quarantine_slots: &'a mut [*mut u8],
        heap: H,
        config: Config,
    ) -> Result<Self, InitError> {
        if config.red_zone < size_of::<usize>() || !config.red_zone.is_multiple_of(GRANULE) {
            return Err(InitError::BadRedZone);
        }
        if app.is_empty()
            || !app.start.is_multiple_of(GRANULE)
            || !app.len().is_multiple_of(GRANULE)
        {
            return Err(InitError::BadAppRegion);
        }
        let needed = app.len() / GRANULE;
        if shadow.len() < needed {
            return Err(InitError::ShadowTooSmall);
        }
        let shadow_addrs = shadow.as_ptr_range();
        if (shadow_addrs.start as usize) < app.end && app.start < shadow_addrs.end as usize {
            return Err(InitError::ShadowOverlapsApp);
        }

        let mut shadow = ShadowMap::new(&mut shadow[..needed], app);
        shadow.fill(config.policy);

        Ok(Self {
            shadow,
            quarantine: Quarantine::new(quarantine_slots),
            heap,
            red_zone: config.red_zone,
        })
    }

    /// Decide whether an access of `size` bytes at `addr` may proceed.
    ///
    /// Hooks turn an `Err` into a fatal report; tests assert on it directly.
    #[inline]
    pub fn check(&self, addr: usize, size: usize, kind: AccessKind) -> Result<(), Violation> {
        check::check_access(&self.shadow, addr, size, kind)
    }

    /// Poison `len` bytes at `addr`, rounding outward to whole granules.
    /// Bytes outside the monitored region are ignored.
    pub fn poison(&mut self, addr: usize, len: usize) {
        self.shadow.poison(addr, len);
    }

    /// Mark `len` bytes at `addr` valid. `addr` must be 8-aligned; a partial
    /// trailing granule keeps its tail poisoned.
    pub fn unpoison(&mut self, addr: usize, len: usize) {
        self.shadow.unpoison(addr, len);
    }
}

struct RuntimeCell {
    runtime: UnsafeCell<MaybeUninit<Asan<'static, SysHeap>>>,
    initialized: AtomicBool,
}

// SAFETY: The `initialized` flag is only flipped inside critical sections
// with Release ordering, and every reader loads it with Acquire before
// touching `runtime`. Mutable access (init, shutdown, the allocator
// wrappers) stays inside critical sections; the lock-free check path takes
// a shared reference only, and the crate's concurrency contract makes the
// caller serialize checks against mutators.
unsafe impl Sync for RuntimeCell {}

static RUNTIME: RuntimeCell = RuntimeCell {
    runtime: UnsafeCell::new(MaybeUninit::uninit()),
    initialized: AtomicBool::new(false),
};

struct QuarantineSlots(UnsafeCell<[*mut u8; QUARANTINE_CAPACITY]>);

// SAFETY: Only ever borrowed by the runtime instance, whose construction is
// guarded by `RUNTIME.initialized` inside a critical section.
unsafe impl Sync for QuarantineSlots {}

static SLOTS: QuarantineSlots =
    QuarantineSlots(UnsafeCell::new([ptr::null_mut(); QUARANTINE_CAPACITY]));

/// Bring up the process-wide runtime over the linker-provided regions.
///
/// Reads the monitored region from `__shadowsan_app_start`/`__shadowsan_app_end`
/// and the shadow buffer from `__shadowsan_shadow_start`/`__shadowsan_shadow_end`;
/// reserve both in the linker script. Call once at startup, before any
/// instrumented code runs.
///
/// # Errors
///
/// [`InitError::AlreadyInitialized`] on a second call, otherwise the
/// validation errors of [`Asan::new`].
#[cfg(target_os = "none")]
pub fn init(config: Config) -> Result<(), InitError> {
    // SAFETY: Provided by the linker script; they delimit reserved regions.
    unsafe extern "C" {
        static __shadowsan_app_start: u8;
        static __shadowsan_app_end: u8;
        static __shadowsan_shadow_start: u8;
        static __shadowsan_shadow_end: u8;
    }

    let app = (&raw const __shadowsan_app_start).expose_provenance()
        ..(&raw const __shadowsan_app_end).expose_provenance();
    let shadow_start = (&raw const __shadowsan_shadow_start).expose_provenance();
    let shadow_end = (&raw const __shadowsan_shadow_end).expose_provenance();

    // SAFETY: The linker script reserves `[shadow_start, shadow_end)` for
    // the shadow buffer alone; the once-guard in `init_with_regions` keeps
    // this exclusive borrow from being handed out twice.
    let shadow = unsafe {
        core::slice::from_raw_parts_mut(
            ptr::with_exposed_provenance_mut(shadow_start),
            shadow_end.saturating_sub(shadow_start),
        )
    };

    // SAFETY: Both regions come from the linker script and are used for
    // nothing else.
    unsafe { init_with_regions(app, shadow, config) }
}

/// Bring up the process-wide runtime over caller-supplied regions.
///
/// This is the target-independent core of [`init`], for platforms that
/// discover their memory map some other way.
///
/// # Safety
///
/// `shadow` and the memory behind `app` must not be used for any other
/// purpose, and no instrumented access may race the initialization.
pub unsafe fn init_with_regions(
    app: Range<usize>,
    shadow: &'static mut [u8],
    config: Config,
) -> Result<(), InitError> {
    critical_section::with(|_| {
        if RUNTIME.initialized.load(Ordering::Acquire) {
            return Err(InitError::AlreadyInitialized);
        }

        // SAFETY: Not initialized, so no runtime instance borrows the slots;
        // the critical section excludes a racing `init`.
        let slots = unsafe { &mut *SLOTS.0.get() };

        defmt::debug!(
            "asan: monitoring {=usize:#x}..{=usize:#x}, {=usize} shadow bytes, {=usize} quarantine slots",
            app.start,
            app.end,
            app.len() / GRANULE,
            slots.len()
        );

        let runtime = Asan::new(shadow, app, slots, SysHeap, config)?;
        // SAFETY: Exclusive access under the critical section; the Release
        // store below publishes the fully written value.
        unsafe { RUNTIME.runtime.get().write(MaybeUninit::new(runtime)) };
        RUNTIME.initialized.store(true, Ordering::Release);
        Ok(())
    })
}

/// Tear the process-wide runtime down: flush the quarantine to the
/// underlying allocator and mark the runtime uninitialized. Hooks fall back
/// to pass-through afterwards. A no-op if the runtime is not up.
pub fn shutdown() {
    critical_section::with(|_| {
        if !RUNTIME.initialized.load(Ordering::Acquire) {
            return;
        }
        // SAFETY: Initialized, and the critical section excludes other
        // mutators.
        let runtime = unsafe { &mut *RUNTIME.runtime.get().cast::<Asan<'static, SysHeap>>() };
        runtime.drain_quarantine();
        RUNTIME.initialized.store(false, Ordering::Release);
    });
}

/// Poison `len` bytes at `addr` in the process-wide runtime. No-op when the
/// runtime is down or the range is unmonitored.
pub fn poison(addr: usize, len: usize) {
    with_runtime_mut(|rt| rt.poison(addr, len));
}

/// Mark `len` bytes at `addr` valid in the process-wide runtime. Use this
/// at startup under [`InitPolicy::Strict`] to open up the data and bss
/// sections.
pub fn unpoison(addr: usize, len: usize) {
    with_runtime_mut(|rt| rt.unpoison(addr, len));
}

/// Run `f` against the process-wide runtime, read-only and lock-free: this
/// is the access-check hot path, entered on every instrumented load and
/// store.
#[inline]
pub(crate) fn with_runtime<R>(f: impl FnOnce(&Asan<'static, SysHeap>) -> R) -> Option<R> {
    // Acquire: pairs with the Release store in `init_with_regions` so a
    // published runtime is seen fully written.
    if !RUNTIME.initialized.load(Ordering::Acquire) {
        return None;
    }
    // SAFETY: Initialized. Shared access only; mutators are serialized by
    // the caller per the crate's concurrency contract.
    Some(f(unsafe {
        &*RUNTIME.runtime.get().cast::<Asan<'static, SysHeap>>()
    }))
}

/// Run `f` against the process-wide runtime with exclusive access, inside a
/// critical section. Used by the allocator wrappers and the poison API.
pub(crate) fn with_runtime_mut<R>(f: impl FnOnce(&mut Asan<'static, SysHeap>) -> R) -> Option<R> {
    critical_section::with(|_| {
        if !RUNTIME.initialized.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: Initialized, and the critical section serializes every
        // mutable borrow of the runtime.
        Some(f(unsafe {
            &mut *RUNTIME.runtime.get().cast::<Asan<'static, SysHeap>>()
        }))
    })
}

/// Host unit tests need defmt's logger symbols at link time; a no-op
/// logger satisfies them.
#[cfg(test)]
mod test_logger {
    #[defmt::global_logger]
    struct NopLogger;

    // SAFETY: Every method is a no-op; there is no state to race on.
    unsafe impl defmt::Logger for NopLogger {
        fn acquire() {}
        unsafe fn flush() {}
        unsafe fn release() {}
        unsafe fn write(_bytes: &[u8]) {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NullHeap;

    impl Heap for NullHeap {
        unsafe fn alloc(&mut self, _size: usize) -> *mut u8 {
            ptr::null_mut()
        }
        unsafe fn dealloc(&mut self, _ptr: *mut u8) {}
    }

    fn config(red_zone: usize) -> Config {
        Config {
            red_zone,
            policy: InitPolicy::Permissive,
        }
    }

    #[test]
    fn rejects_bad_red_zone() {
        for red_zone in [0, 4, 12] {
            let mut shadow = [0u8; 8];
            let mut slots: [*mut u8; 0] = [];
            let err = Asan::new(
                &mut shadow,
                0x1000..0x1040,
                &mut slots,
                NullHeap,
                config(red_zone),
            )
            .err();
            assert_eq!(err, Some(InitError::BadRedZone), "red_zone {red_zone}");
        }
    }

    #[test]
    fn rejects_bad_app_region() {
        for app in [0x1000..0x1000, 0x1004..0x1044, 0x1000..0x1043] {
            let mut shadow = [0u8; 8];
            let mut slots: [*mut u8; 0] = [];
            let err = Asan::new(&mut shadow, app.clone(), &mut slots, NullHeap, config(16)).err();
            assert_eq!(err, Some(InitError::BadAppRegion), "app {app:?}");
        }
    }

    #[test]
    fn rejects_undersized_shadow() {
        let mut shadow = [0u8; 7];
        let mut slots: [*mut u8; 0] = [];
        let err = Asan::new(&mut shadow, 0x1000..0x1040, &mut slots, NullHeap, config(16)).err();
        assert_eq!(err, Some(InitError::ShadowTooSmall));
    }

    #[test]
    fn rejects_shadow_inside_monitored_region() {
        let mut shadow = [0u8; 8];
        let start = shadow.as_ptr() as usize & !(GRANULE - 1);
        let app = start..start + 8 * GRANULE;
        let mut slots: [*mut u8; 0] = [];
        let err = Asan::new(&mut shadow, app, &mut slots, NullHeap, config(16)).err();
        assert_eq!(err, Some(InitError::ShadowOverlapsApp));
    }

    #[test]
    fn strict_policy_starts_fully_poisoned() {
        let mut shadow = [0u8; 8];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = Asan::new(
            &mut shadow,
            0x1000..0x1040,
            &mut slots,
            NullHeap,
            Config {
                red_zone: 16,
                policy: InitPolicy::Strict,
            },
        )
        .unwrap();

        assert!(rt.check(0x1000, 1, AccessKind::Read).is_err());
        // The startup flow under Strict: explicitly open up known-good
        // static regions.
        rt.unpoison(0x1000, 0x20);
        assert!(rt.check(0x1000, 8, AccessKind::Read).is_ok());
        assert!(rt.check(0x1020, 1, AccessKind::Read).is_err());
    }

    #[test]
    fn oversized_shadow_uses_leading_prefix() {
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let rt = Asan::new(&mut shadow, 0x1000..0x1040, &mut slots, NullHeap, config(16)).unwrap();
        assert!(rt.check(0x1038, 8, AccessKind::Write).is_ok());
    }
}
