//! defmt logger writing encoded frames to semihosting stdout, where the
//! xtask harness captures and decodes them.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering, compiler_fence};

use cortex_m_semihosting::hio::{self, HostStream};
use critical_section::RestoreState;
use defmt::Encoder;

#[defmt::global_logger]
struct Logger;

struct LoggerState {
    cs_state: UnsafeCell<RestoreState>,
    encoder: UnsafeCell<Encoder>,
    stdout: UnsafeCell<Option<HostStream>>,
    /// Reentrancy depth. Logs from a fault handler that interrupts an
    /// in-progress log are dropped rather than corrupting the frame.
    depth: AtomicUsize,
}

// SAFETY: The cells are only touched between `acquire` and `release`, i.e.
// inside the critical section taken in `acquire`, and reentrant calls bail
// out on the depth counter.
unsafe impl Sync for LoggerState {}

static STATE: LoggerState = LoggerState {
    cs_state: UnsafeCell::new(RestoreState::invalid()),
    encoder: UnsafeCell::new(Encoder::new()),
    stdout: UnsafeCell::new(None),
    depth: AtomicUsize::new(0),
};

/// Write raw encoded bytes to the host.
///
/// # Safety
///
/// Must be called between `acquire` and `release`.
unsafe fn sink(bytes: &[u8]) {
    // SAFETY: Caller guarantees we are inside the critical section.
    let stdout = unsafe { &mut *STATE.stdout.get() };
    if stdout.is_none() {
        *stdout = hio::hstdout().ok();
    }
    if let Some(stream) = stdout {
        let _ = stream.write_all(bytes);
    }
}

// SAFETY: `acquire` enters a critical section that `release` leaves, all
// cell access happens in between, and unbalanced reentrant calls are
// detected and dropped.
unsafe impl defmt::Logger for Logger {
    fn acquire() {
        if STATE.depth.fetch_add(1, Ordering::Acquire) > 0 {
            return;
        }

        // SAFETY: defmt guarantees balanced acquire/release; the matching
        // release happens in `release()`.
        let restore = unsafe { critical_section::acquire() };
        compiler_fence(Ordering::SeqCst);
        // SAFETY: Inside the critical section just taken.
        unsafe { STATE.cs_state.get().write(restore) };

        // SAFETY: Inside the critical section.
        unsafe { &mut *STATE.encoder.get() }.start_frame(|b| unsafe { sink(b) });
    }

    unsafe fn flush() {
        // Semihosting writes are synchronous; nothing is buffered here.
    }

    unsafe fn release() {
        if STATE.depth.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        // SAFETY: Still inside the critical section from `acquire`.
        unsafe { &mut *STATE.encoder.get() }.end_frame(|b| unsafe { sink(b) });

        compiler_fence(Ordering::SeqCst);
        // SAFETY: Restores the state saved by `acquire`.
        unsafe { critical_section::release(STATE.cs_state.get().read()) };
    }

    unsafe fn write(bytes: &[u8]) {
        if STATE.depth.load(Ordering::Relaxed) != 1 {
            return;
        }
        // SAFETY: defmt calls this between acquire and release, so we are
        // inside the critical section.
        unsafe { &mut *STATE.encoder.get() }.write(bytes, |b| unsafe { sink(b) });
    }
}
