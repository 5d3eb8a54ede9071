//! Allocator interposer: `malloc`/`free` replacements that wrap the
//! underlying allocator with poisoned red zones and route frees through the
//! quarantine.
//!
//! Layout of one allocation for requested size `S` and red-zone width `R`:
//!
//! ```text
//! base                      user = base + R
//! │ R bytes poisoned        │ ceil(S, 8) bytes valid │ R bytes poisoned │
//! │ …padding… [S: usize]    │ returned to caller     │                  │
//! ```
//!
//! The requested size lives in the last `size_of::<usize>()` bytes of the
//! leading red zone. No instrumented load or store ever targets that slot,
//! so storing it under poison is fine; `free` reads it back to recover the
//! allocation length without a side table.

use core::ffi::c_void;
use core::ptr;

use crate::shadow::GRANULE;
use crate::{Asan, Heap};

unsafe extern "C" {
    fn malloc(size: usize) -> *mut c_void;
    fn free(ptr: *mut c_void);
}

/// The platform allocator, reached through the C `malloc`/`free` symbols.
/// Blocks are assumed to be at least 8-aligned, which every conforming
/// `malloc` provides.
#[derive(Default)]
pub struct SysHeap;

impl Heap for SysHeap {
    unsafe fn alloc(&mut self, size: usize) -> *mut u8 {
        // SAFETY: plain forwarding to the C allocator.
        unsafe { malloc(size).cast() }
    }

    unsafe fn dealloc(&mut self, ptr: *mut u8) {
        // SAFETY: `ptr` came out of `alloc` above.
        unsafe { free(ptr.cast()) }
    }
}

#[inline]
const fn round_up_to_granule(len: usize) -> usize {
    (len + (GRANULE - 1)) & !(GRANULE - 1)
}

/// Address arithmetic for one allocation, shared by the `malloc` and `free`
/// paths so the red-zone layout cannot drift between them.
struct BlockLayout {
    base: *mut u8,
    user: *mut u8,
    requested: usize,
}

impl BlockLayout {
    fn from_base(base: *mut u8, red_zone: usize, requested: usize) -> Self {
        // SAFETY: the block spans `requested + 2 * red_zone` bytes, so
        // `base + red_zone` stays inside it.
        let user = unsafe { base.add(red_zone) };
        Self {
            base,
            user,
            requested,
        }
    }

    /// Recover the layout from the user pointer handed to `free`, reading
    /// the requested size back out of the leading red zone.
    ///
    /// # Safety
    ///
    /// `user` must have been returned by [`Asan::malloc`] with the same
    /// red-zone width and not freed since.
    unsafe fn from_user(user: *mut u8, red_zone: usize) -> Self {
        // SAFETY: the caller guarantees `user` points `red_zone` bytes into
        // a live block, so both offsets stay inside it; the size slot was
        // written by `malloc` and is aligned (user is 8-aligned).
        unsafe {
            let requested = user.cast::<usize>().sub(1).read();
            let base = user.sub(red_zone);
            Self {
                base,
                user,
                requested,
            }
        }
    }

    fn size_slot(&self) -> *mut usize {
        // SAFETY: the slot occupies the tail of the leading red zone, which
        // is at least `size_of::<usize>()` bytes wide (validated at init).
        unsafe { self.user.cast::<usize>().sub(1) }
    }

    /// User-region length rounded to whole granules.
    fn user_len(&self) -> usize {
        round_up_to_granule(self.requested)
    }

    fn trailing_red_zone(&self) -> usize {
        self.user as usize + self.user_len()
    }
}

impl<H: Heap> Asan<'_, H> {
    /// Allocate `size` bytes flanked by poisoned red zones.
    ///
    /// Returns null if the underlying allocator does, leaving the shadow
    /// untouched. The returned pointer is 8-aligned.
    pub fn malloc(&mut self, size: usize) -> *mut u8 {
        let Some(total) = size.checked_add(2 * self.red_zone) else {
            return ptr::null_mut();
        };
        // SAFETY: requesting fresh memory from the underlying allocator.
        let base = unsafe { self.heap.alloc(total) };
        if base.is_null() {
            return ptr::null_mut();
        }

        let block = BlockLayout::from_base(base, self.red_zone, size);
        defmt::trace!(
            "asan: malloc {=usize} -> {=usize:#x}",
            size,
            block.user as usize
        );

        self.shadow.poison(base as usize, self.red_zone);
        // SAFETY: the slot lies inside the block; see `size_slot`. The
        // runtime's own stores are not instrumented, so writing under
        // poison needs no check bypass.
        unsafe { block.size_slot().write(size) };
        self.shadow.unpoison(block.user as usize, block.user_len());
        self.shadow.poison(block.trailing_red_zone(), self.red_zone);

        block.user
    }

    /// Free a pointer previously returned by [`Asan::malloc`].
    ///
    /// The user region is poisoned immediately; the block itself either
    /// enters the quarantine or goes straight back to the underlying
    /// allocator. `free(null)` is a no-op. Passing any other foreign
    /// pointer is undefined behavior, exactly as with libc `free`.
    pub fn free(&mut self, user: *mut u8) {
        if user.is_null() {
            return;
        }
        // SAFETY: per the contract above, `user` came from `malloc`.
        let block = unsafe { BlockLayout::from_user(user, self.red_zone) };
        defmt::trace!(
            "asan: free {=usize:#x} len {=usize}",
            user as usize,
            block.requested
        );

        self.shadow.poison(block.user as usize, block.user_len());

        if self.quarantine.is_enabled() {
            if let Some(evicted) = self.quarantine.push(block.base) {
                // SAFETY: the evicted pointer is a base pointer from a past
                // `malloc` that has sat unreferenced in the ring since.
                unsafe { self.heap.dealloc(evicted) };
            }
        } else {
            // SAFETY: `base` is the pointer the underlying allocator gave us.
            unsafe { self.heap.dealloc(block.base) };
        }
    }

    /// Release every quarantined block to the underlying allocator.
    pub(crate) fn drain_quarantine(&mut self) {
        let Self {
            quarantine, heap, ..
        } = self;
        // SAFETY: drained pointers are base pointers owned by the ring.
        quarantine.drain(|base| unsafe { heap.dealloc(base) });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::check::AccessKind;
    use crate::{Config, InitPolicy};

    const RED_ZONE: usize = 16;

    /// Backing memory for one test world. 8-aligned so it can serve as the
    /// monitored region directly.
    #[repr(align(8))]
    struct Arena([u8; 512]);

    /// Bump allocator over the arena that records what it releases, so
    /// tests can observe when a block actually reaches the underlying
    /// allocator.
    struct TestHeap {
        next: usize,
        end: usize,
        freed: [*mut u8; 8],
        freed_len: usize,
        fail_next: bool,
    }

    impl TestHeap {
        fn over(arena: &mut Arena) -> Self {
            let start = arena.0.as_mut_ptr().expose_provenance();
            Self {
                next: start,
                end: start + arena.0.len(),
                freed: [ptr::null_mut(); 8],
                freed_len: 0,
                fail_next: false,
            }
        }
    }

    impl Heap for TestHeap {
        unsafe fn alloc(&mut self, size: usize) -> *mut u8 {
            if self.fail_next {
                self.fail_next = false;
                return ptr::null_mut();
            }
            let at = self.next;
            let next = at + round_up_to_granule(size);
            if next > self.end {
                return ptr::null_mut();
            }
            self.next = next;
            ptr::with_exposed_provenance_mut(at)
        }

        unsafe fn dealloc(&mut self, ptr: *mut u8) {
            self.freed[self.freed_len] = ptr;
            self.freed_len += 1;
        }
    }

    fn world<'a>(
        arena: &mut Arena,
        shadow: &'a mut [u8; 64],
        slots: &'a mut [*mut u8],
    ) -> Asan<'a, TestHeap> {
        let start = arena.0.as_ptr() as usize;
        let app = start..start + arena.0.len();
        let heap = TestHeap::over(arena);
        Asan::new(
            shadow,
            app,
            slots,
            heap,
            Config {
                red_zone: RED_ZONE,
                policy: InitPolicy::Permissive,
            },
        )
        .unwrap()
    }

    fn reads_ok(rt: &Asan<'_, TestHeap>, addr: usize) -> bool {
        rt.check(addr, 1, AccessKind::Read).is_ok()
    }

    #[test]
    fn in_bounds_accesses_pass() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(16) as usize;
        assert!(p.is_multiple_of(8));
        for i in 0..16 {
            assert!(reads_ok(&rt, p + i), "byte {i} of a live block");
            assert!(rt.check(p + i, 1, AccessKind::Write).is_ok());
        }
        assert!(rt.check(p, 8, AccessKind::Write).is_ok());
        assert!(rt.check(p + 8, 8, AccessKind::Read).is_ok());
    }

    #[test]
    fn red_zones_fault_on_both_sides() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(16) as usize;
        // Right overflow: first byte past the block, through the zone.
        for j in 0..RED_ZONE {
            assert!(!reads_ok(&rt, p + 16 + j), "overflow byte {j}");
        }
        // Left underflow.
        for j in 1..=RED_ZONE {
            assert!(!reads_ok(&rt, p - j), "underflow byte {j}");
        }
        let err = rt.check(p + 16, 1, AccessKind::Write).unwrap_err();
        assert_eq!(err.addr, p + 16);
        assert_eq!(err.size, 1);
        assert_eq!(err.kind, AccessKind::Write);
    }

    #[test]
    fn unrounded_sizes_keep_the_tail_granule_valid() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        // 13 rounds up to 16: the slack bytes share the user granule and
        // stay accessible; the red zone starts at the granule boundary.
        let p = rt.malloc(13) as usize;
        assert!(reads_ok(&rt, p + 12));
        assert!(reads_ok(&rt, p + 15));
        assert!(!reads_ok(&rt, p + 16));
    }

    #[test]
    fn use_after_free_faults() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(8);
        let addr = p as usize;
        assert!(reads_ok(&rt, addr));
        rt.free(p);
        for i in 0..8 {
            assert!(!reads_ok(&rt, addr + i), "freed byte {i}");
        }
        let err = rt.check(addr, 1, AccessKind::Read).unwrap_err();
        assert_eq!(err.addr, addr);
    }

    #[test]
    fn quarantine_delays_release_to_the_underlying_heap() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots = [ptr::null_mut(); 3];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(8);
        let addr = p as usize;
        let base = addr - RED_ZONE;
        rt.free(p);

        // Two further unrelated cycles: block must still be quarantined
        // and still poisoned.
        for size in [24, 40] {
            let q = rt.malloc(size);
            rt.free(q);
        }
        assert_eq!(rt.heap.freed_len, 0);
        assert!(!reads_ok(&rt, addr));

        // One more free pushes the ring past capacity and evicts `p`.
        let q = rt.malloc(8);
        rt.free(q);
        assert_eq!(rt.heap.freed_len, 1);
        assert_eq!(rt.heap.freed[0] as usize, base);
    }

    #[test]
    fn disabled_quarantine_releases_immediately() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(8);
        let base = p as usize - RED_ZONE;
        rt.free(p);
        assert_eq!(rt.heap.freed_len, 1);
        assert_eq!(rt.heap.freed[0] as usize, base);
    }

    #[test]
    fn allocator_failure_returns_null_and_leaves_shadow_alone() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);
        rt.heap.fail_next = true;

        assert!(rt.malloc(16).is_null());
        assert!(rt.shadow.bytes().iter().all(|&b| b == 0));

        // Absurd size overflows the layout arithmetic: also null.
        assert!(rt.malloc(usize::MAX - 4).is_null());
        assert!(rt.shadow.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn free_null_is_a_no_op() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots: [*mut u8; 0] = [];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);
        rt.free(ptr::null_mut());
        assert_eq!(rt.heap.freed_len, 0);
    }

    #[test]
    fn drain_quarantine_flushes_held_blocks() {
        let mut arena = Arena([0; 512]);
        let mut shadow = [0u8; 64];
        let mut slots = [ptr::null_mut(); 3];
        let mut rt = world(&mut arena, &mut shadow, &mut slots);

        let p = rt.malloc(8);
        let q = rt.malloc(8);
        rt.free(p);
        rt.free(q);
        assert_eq!(rt.heap.freed_len, 0);
        rt.drain_quarantine();
        assert_eq!(rt.heap.freed_len, 2);
    }
}
