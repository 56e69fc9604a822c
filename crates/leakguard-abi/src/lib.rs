// All extern "C" exports accept raw pointers from C callers; the tracker
// validates at runtime, so per-function safety docs would be redundant
// boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # leakguard-abi
//!
//! ABI-compatible `extern "C"` boundary for leakguard.
//!
//! This crate produces a `cdylib` (`libleakguard.so`) exporting `malloc`,
//! `calloc`, `realloc`, and `free` with the standard names and signatures,
//! so that preloading (or link-time `--wrap`) transparently routes every
//! allocation-family call in the process, including calls made inside
//! third-party libraries, through the tracking engine.
//!
//! # Architecture
//!
//! ```text
//! C caller -> ABI entry (this crate) -> Tracker state machine -> system allocator
//! ```
//!
//! Violations detected by the tracker (double free, realloc after free,
//! canary corruption, symbol-resolution failure, out of memory) never
//! return to the caller: they are reported on stderr with a raw `write(2)`
//! and terminate the process with a non-zero status.
//!
//! In debug builds the `#[unsafe(no_mangle)]` exports are suppressed so
//! test binaries do not shadow their own allocator (which would cause
//! infinite recursion in the test binary itself).

pub mod hooks;
pub mod malloc_abi;
mod tracker_state;
