//! Allocation tracking engine for leakguard.
//!
//! This crate implements the core of a transparent allocator shim: every
//! tracked allocation is prefixed with an intrusive header (size, lifecycle
//! flag, canary) and linked into the allocating thread's registry list.
//! Violations of the block lifecycle (double free, realloc after free,
//! header corruption) are detected at operation entry and are always fatal.
//!
//! # Architecture
//!
//! - **Real-allocator binding** (`real`): lazy one-shot `dlsym(RTLD_NEXT)`
//!   resolution of the system `malloc`/`realloc`/`free`
//! - **Block metadata** (`header`): the `#[repr(C)]` header with a fixed
//!   sentinel canary and raw-word lifecycle flag
//! - **Registries** (`registry`): unsynchronized per-thread intrusive lists
//!   plus a mutex-guarded global directory of registry roots
//! - **State machine** (`tracker`): allocate / zeroed-allocate / resize /
//!   release / exit sweep / fork protocol
//! - **Diagnostics** (`report`): violation taxonomy and the async-signal-safe
//!   fatal path (raw `write(2)`, then `_exit`)
//! - **Configuration** (`config`): `LEAKGUARD_REPORT` runtime mode
//! - **Metrics** (`metrics`): relaxed atomic counters for observability
//!
//! The per-allocation hot path takes no lock: only the owning thread ever
//! touches its own registry list. The directory mutex is held for thread
//! registration, the fork window, and the exit sweep, never per allocation.

pub mod config;
pub mod header;
pub mod metrics;
pub mod real;
pub mod registry;
pub mod report;
pub mod tracker;

pub use config::ReportMode;
pub use metrics::{MetricsSnapshot, TrackerMetrics};
pub use real::RealAlloc;
pub use report::Violation;
pub use tracker::{LeakSummary, Tracker};
