//! Process lifecycle integration: startup constructor, exit-time leak
//! sweep, and fork coordination.
//!
//! The constructor runs from `.init_array` when the shared object loads
//! (release builds only, matching the export gating in `malloc_abi`). It
//! binds the system allocator eagerly, registers the fork protocol with
//! `pthread_atfork`, and registers the exit sweep with `atexit`.

use leakguard_core::{RealAlloc, config, report};

use crate::tracker_state;

/// Walk every registered thread's list, reclaim surviving blocks, and
/// report per the configured mode. Public so end-to-end tests can drive
/// the exit path explicitly.
pub fn sweep_and_report() {
    let Some(tracker) = tracker_state::try_global_tracker() else {
        return;
    };
    let summary = tracker.sweep();
    let mode = config::report_mode();
    if !summary.is_clean() && mode.emits_leak_line() {
        report::emit_leak_line(summary.blocks, summary.bytes);
    }
    if mode.emits_counters() {
        let snap = tracker.metrics().snapshot();
        report::emit_metrics_line(snap.allocated_blocks, snap.released_blocks, snap.resized_blocks);
    }
}

extern "C" fn sweep_at_exit() {
    sweep_and_report();
}

unsafe extern "C" fn fork_prepare() {
    if let Some(tracker) = tracker_state::try_global_tracker() {
        tracker.fork_prepare();
    }
}

unsafe extern "C" fn fork_parent() {
    if let Some(tracker) = tracker_state::try_global_tracker() {
        tracker.fork_parent();
    }
}

unsafe extern "C" fn fork_child() {
    if let Some(tracker) = tracker_state::try_global_tracker() {
        tracker.fork_child();
    }
}

#[cfg_attr(debug_assertions, allow(dead_code))]
extern "C" fn startup() {
    // Bind before any interposed entry point needs the real allocator;
    // binding failure is unrecoverable and reports fatally here.
    let _ = RealAlloc::get();
    // SAFETY: registering fixed function pointers with the platform hooks.
    unsafe {
        libc::pthread_atfork(Some(fork_prepare), Some(fork_parent), Some(fork_child));
        libc::atexit(sweep_at_exit);
    }
}

/// Loader-run constructor. Suppressed in debug builds alongside the
/// `#[unsafe(no_mangle)]` exports; tests drive `sweep_and_report` and the
/// fork handlers directly.
#[cfg(not(debug_assertions))]
#[used]
#[unsafe(link_section = ".init_array")]
static STARTUP: extern "C" fn() = startup;
