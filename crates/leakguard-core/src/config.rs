//! Runtime report configuration.
//!
//! The exit-time report mode is set via the `LEAKGUARD_REPORT` environment
//! variable:
//! - `summary` (default): one leak line at normal exit when blocks leaked.
//! - `verbose`: the leak line plus one counters line.
//! - `silent`: no exit-time output at all. Violations still report; the
//!   fatal path is not configurable.

use std::sync::atomic::{AtomicU8, Ordering};

/// How much the exit sweep reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportMode {
    /// No exit-time output.
    Silent,
    /// One leak line when anything leaked.
    #[default]
    Summary,
    /// Leak line plus operation counters.
    Verbose,
}

impl ReportMode {
    /// Parse from string (case-insensitive); unknown values fall back to
    /// the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "silent" | "off" | "none" | "0" => Self::Silent,
            "verbose" | "full" => Self::Verbose,
            _ => Self::Summary,
        }
    }

    #[must_use]
    pub const fn emits_leak_line(self) -> bool {
        !matches!(self, Self::Silent)
    }

    #[must_use]
    pub const fn emits_counters(self) -> bool {
        matches!(self, Self::Verbose)
    }
}

// Atomic cache: 0=unresolved, 1=Silent, 2=Summary, 3=Verbose, 255=resolving.
// A non-blocking state machine instead of OnceLock: under LD_PRELOAD our own
// exported allocator can be re-entered during std::env::var(), and parking a
// reentrant caller on a OnceLock futex would deadlock.
static CACHED_MODE: AtomicU8 = AtomicU8::new(MODE_UNRESOLVED);

const MODE_UNRESOLVED: u8 = 0;
const MODE_SILENT: u8 = 1;
const MODE_SUMMARY: u8 = 2;
const MODE_VERBOSE: u8 = 3;
const MODE_RESOLVING: u8 = 255;

fn mode_to_u8(mode: ReportMode) -> u8 {
    match mode {
        ReportMode::Silent => MODE_SILENT,
        ReportMode::Summary => MODE_SUMMARY,
        ReportMode::Verbose => MODE_VERBOSE,
    }
}

fn u8_to_mode(v: u8) -> ReportMode {
    match v {
        MODE_SILENT => ReportMode::Silent,
        MODE_VERBOSE => ReportMode::Verbose,
        _ => ReportMode::Summary,
    }
}

/// Get the configured report mode (reads the env var on first call, caches
/// thereafter).
///
/// A reentrant call that arrives while the env var is being resolved sees
/// the RESOLVING state and gets the default.
#[must_use]
pub fn report_mode() -> ReportMode {
    let cached = CACHED_MODE.load(Ordering::Relaxed);
    if cached != MODE_UNRESOLVED && cached != MODE_RESOLVING {
        return u8_to_mode(cached);
    }
    if CACHED_MODE
        .compare_exchange(
            MODE_UNRESOLVED,
            MODE_RESOLVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_err()
    {
        // Another caller (or a reentrant frame) is resolving right now.
        return ReportMode::default();
    }
    let mode = match std::env::var("LEAKGUARD_REPORT") {
        Ok(raw) => ReportMode::from_str_loose(&raw),
        Err(_) => ReportMode::default(),
    };
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_loose_and_defaults_to_summary() {
        assert_eq!(ReportMode::from_str_loose("SILENT"), ReportMode::Silent);
        assert_eq!(ReportMode::from_str_loose("off"), ReportMode::Silent);
        assert_eq!(ReportMode::from_str_loose("0"), ReportMode::Silent);
        assert_eq!(ReportMode::from_str_loose("verbose"), ReportMode::Verbose);
        assert_eq!(ReportMode::from_str_loose("full"), ReportMode::Verbose);
        assert_eq!(ReportMode::from_str_loose("summary"), ReportMode::Summary);
        assert_eq!(ReportMode::from_str_loose("nonsense"), ReportMode::Summary);
        assert_eq!(ReportMode::from_str_loose(""), ReportMode::Summary);
    }

    #[test]
    fn mode_predicates_agree_with_variants() {
        assert!(!ReportMode::Silent.emits_leak_line());
        assert!(ReportMode::Summary.emits_leak_line());
        assert!(ReportMode::Verbose.emits_leak_line());
        assert!(ReportMode::Verbose.emits_counters());
        assert!(!ReportMode::Summary.emits_counters());
    }

    #[test]
    fn cached_mode_is_stable_across_calls() {
        let first = report_mode();
        assert_eq!(report_mode(), first);
    }
}
