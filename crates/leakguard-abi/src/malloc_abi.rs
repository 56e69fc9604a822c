//! ABI layer for the allocation family (`malloc`, `free`, `calloc`,
//! `realloc`).
//!
//! Each entry point validates through the tracker; detected violations
//! never return to the caller. A per-thread reentry guard keeps the
//! tracker's own bookkeeping allocations (registry roots, directory
//! growth) off the tracked path: a reentrant call goes straight to the
//! system allocator, untracked.
//!
//! In release builds these functions carry `#[unsafe(no_mangle)]` so the
//! loader resolves the standard allocator names to them; in debug builds
//! the attribute is suppressed to avoid shadowing the system allocator in
//! test binaries.

use std::cell::Cell;
use std::ffi::c_void;

use leakguard_core::{RealAlloc, report};

use crate::tracker_state;

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct ReentryGuard;

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

#[inline]
fn enter_reentry_guard() -> Option<ReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH.with(|depth| {
        let current = depth.get();
        if current > 0 {
            None
        } else {
            depth.set(current + 1);
            Some(ReentryGuard)
        }
    })
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// Interposed `malloc` -- allocates `size` bytes of tracked, uninitialized
/// memory.
///
/// Never returns null: allocation failure is treated as fatal, since
/// corruption safety is prioritized over allocator-API fidelity here.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_reentry_guard() else {
        // SAFETY: reentrant bookkeeping path bypasses tracking entirely.
        return unsafe { RealAlloc::get().allocate(size.max(1)) };
    };
    let Some(tracker) = tracker_state::try_global_tracker() else {
        // SAFETY: tracker is mid-initialization on another thread; fall
        // through untracked.
        return unsafe { RealAlloc::get().allocate(size.max(1)) };
    };
    match tracker.allocate(size) {
        Ok(payload) => payload.as_ptr().cast(),
        Err(violation) => report::fail(violation),
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// Interposed `calloc` -- allocates a zero-filled array of `nmemb` elements
/// of `size` bytes each.
///
/// An overflowing `nmemb * size` can never be satisfied and is reported as
/// out-of-memory (fatal); there is no short-allocation fallback.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_reentry_guard() else {
        let total = nmemb.saturating_mul(size).max(1);
        // SAFETY: reentrant bookkeeping path bypasses tracking entirely.
        let raw = unsafe { RealAlloc::get().allocate(total) };
        if !raw.is_null() {
            // SAFETY: fresh allocation of `total` bytes.
            unsafe { std::ptr::write_bytes(raw.cast::<u8>(), 0, total) };
        }
        return raw;
    };
    let Some(tracker) = tracker_state::try_global_tracker() else {
        let total = nmemb.saturating_mul(size).max(1);
        // SAFETY: untracked fallback during tracker initialization.
        let raw = unsafe { RealAlloc::get().allocate(total) };
        if !raw.is_null() {
            // SAFETY: fresh allocation of `total` bytes.
            unsafe { std::ptr::write_bytes(raw.cast::<u8>(), 0, total) };
        }
        return raw;
    };
    match tracker.allocate_zeroed(nmemb, size) {
        Ok(payload) => payload.as_ptr().cast(),
        Err(violation) => report::fail(violation),
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// Interposed `realloc` -- resizes a tracked block, relocating it if the
/// system allocator must.
///
/// A null `ptr` behaves as `malloc(size)`. Resizing an already freed block
/// is a fatal violation.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_reentry_guard() else {
        // SAFETY: reentrant bookkeeping path bypasses tracking entirely.
        return unsafe { RealAlloc::get().resize(ptr, size.max(1)) };
    };
    let Some(tracker) = tracker_state::try_global_tracker() else {
        // SAFETY: untracked fallback during tracker initialization.
        return unsafe { RealAlloc::get().resize(ptr, size.max(1)) };
    };
    // SAFETY: `ptr` is null or a payload pointer the caller got from us.
    match unsafe { tracker.resize(ptr.cast(), size) } {
        Ok(payload) => payload.as_ptr().cast(),
        Err(violation) => report::fail(violation),
    }
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// Interposed `free` -- releases a tracked block.
///
/// A null `ptr` is a no-op, per the conventional contract. Double free and
/// header corruption are fatal violations.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    let Some(_reentry_guard) = enter_reentry_guard() else {
        // SAFETY: reentrant bookkeeping path bypasses tracking entirely.
        unsafe { RealAlloc::get().release(ptr) };
        return;
    };
    let Some(tracker) = tracker_state::try_global_tracker() else {
        // SAFETY: untracked fallback during tracker initialization.
        unsafe { RealAlloc::get().release(ptr) };
        return;
    };
    // SAFETY: `ptr` is null or a payload pointer the caller got from us.
    if let Err(violation) = unsafe { tracker.release(ptr.cast()) } {
        report::fail(violation);
    }
}
