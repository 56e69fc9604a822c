//! Global state for the allocation tracker.
//!
//! Holds the singleton [`Tracker`] used by all ABI entry points, so blocks
//! allocated through `malloc` are visible to `realloc`, `free`, the fork
//! protocol, and the exit sweep.
//!
//! Uses manual atomic init instead of OnceLock to prevent deadlock under
//! LD_PRELOAD (OnceLock's futex waits on same-thread reentrant init).

use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use leakguard_core::Tracker;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

static TRACKER_STATE: AtomicU8 = AtomicU8::new(STATE_UNINIT);
static TRACKER_PTR: AtomicPtr<Tracker> = AtomicPtr::new(std::ptr::null_mut());

/// Global tracker instance.
///
/// Returns `None` during initialization (reentrant guard) to allow ABI
/// functions to fall through to the raw system allocator under LD_PRELOAD.
pub(crate) fn try_global_tracker() -> Option<&'static Tracker> {
    let state = TRACKER_STATE.load(Ordering::Acquire);

    if state == STATE_READY {
        let ptr = TRACKER_PTR.load(Ordering::Acquire);
        // SAFETY: set once below and never cleared.
        return Some(unsafe { &*ptr });
    }

    if state == STATE_INITIALIZING {
        return None;
    }

    if TRACKER_STATE
        .compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        return if TRACKER_STATE.load(Ordering::Acquire) == STATE_READY {
            let ptr = TRACKER_PTR.load(Ordering::Acquire);
            // SAFETY: READY implies the pointer was published.
            Some(unsafe { &*ptr })
        } else {
            None
        };
    }

    // The Box below allocates through the interposed malloc; the caller's
    // reentry guard routes that inner call straight to the system allocator.
    let tracker = Box::new(Tracker::new());
    let ptr = Box::into_raw(tracker);
    TRACKER_PTR.store(ptr, Ordering::Release);
    TRACKER_STATE.store(STATE_READY, Ordering::Release);

    // SAFETY: just published.
    Some(unsafe { &*ptr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_initializes_once_and_stays_put() {
        let first = try_global_tracker().expect("tracker ready") as *const Tracker;
        let second = try_global_tracker().expect("tracker ready") as *const Tracker;
        assert_eq!(first, second);
    }
}
