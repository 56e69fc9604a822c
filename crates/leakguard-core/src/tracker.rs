//! The allocation state machine: allocate, zeroed-allocate, resize,
//! release, exit sweep, and the fork protocol.
//!
//! Every operation validates before it trusts: the canary check always runs
//! first (corruption may have clobbered the lifecycle flag too), then the
//! Freed flag. An `Err` from any operation means the instrumented program
//! already has undefined behavior; the ABI boundary turns it into a fatal
//! report. There is no recoverable error path.

use std::ptr::{self, NonNull};

use crate::header::{BlockHeader, HEADER_SIZE};
use crate::metrics::TrackerMetrics;
use crate::real::RealAlloc;
use crate::registry::GlobalDirectory;
use crate::report::Violation;

/// What the exit sweep found still alive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LeakSummary {
    /// Blocks still flagged Alive at sweep time.
    pub blocks: usize,
    /// Their total payload bytes.
    pub bytes: usize,
}

impl LeakSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.blocks == 0
    }
}

/// Per-process allocation tracker.
///
/// Owns the global thread directory; per-thread registry lists hang off it.
/// All methods are callable from arbitrary application threads; only
/// [`Tracker::sweep`] and the fork protocol assume the rest of the process
/// is quiescent.
pub struct Tracker {
    directory: GlobalDirectory,
    metrics: TrackerMetrics,
}

impl Tracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: GlobalDirectory::new(),
            metrics: TrackerMetrics::new(),
        }
    }

    #[must_use]
    pub fn metrics(&self) -> &TrackerMetrics {
        &self.metrics
    }

    /// Allocate `size` payload bytes under tracking.
    ///
    /// Registers the calling thread in the directory on its first
    /// allocation, prefixes a fresh Alive header, and links it at the head
    /// of the thread's registry list. O(1).
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, Violation> {
        let real = RealAlloc::try_get()?;
        let root = self.directory.thread_root();
        let total = HEADER_SIZE.checked_add(size).ok_or(Violation::OutOfMemory)?;
        // SAFETY: plain request to the system allocator.
        let raw = unsafe { real.allocate(total) };
        if raw.is_null() {
            return Err(Violation::OutOfMemory);
        }
        let hdr = raw.cast::<BlockHeader>();
        // SAFETY: `raw` spans HEADER_SIZE + size writable bytes; the root
        // belongs to the calling thread.
        unsafe {
            BlockHeader::initialize(hdr, size);
            (*root).push(hdr);
        }
        self.metrics.record_allocate(size);
        // SAFETY: payload of a non-null allocation is non-null.
        Ok(unsafe { NonNull::new_unchecked(BlockHeader::payload(hdr)) })
    }

    /// Allocate `count * size` zero-filled payload bytes.
    ///
    /// A multiplication overflow can never be satisfied, so it reports as
    /// out-of-memory rather than wrapping into a short allocation.
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Result<NonNull<u8>, Violation> {
        let total = count.checked_mul(size).ok_or(Violation::OutOfMemory)?;
        let payload = self.allocate(total)?;
        // SAFETY: `payload` spans `total` writable bytes.
        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        Ok(payload)
    }

    /// Resize a tracked block to `new_size` payload bytes; the underlying
    /// resize may relocate it, giving the header a new identity.
    ///
    /// A null `ptr` behaves as [`Tracker::allocate`]. Must be called by the
    /// thread that owns the block: the unlink scans only the calling
    /// thread's list (cross-thread resize hazard, documented not patched).
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// tracker.
    pub unsafe fn resize(&self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, Violation> {
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        let real = RealAlloc::try_get()?;
        // SAFETY: caller guarantees `ptr` is one of our payload pointers.
        let hdr = unsafe { BlockHeader::from_payload(ptr) };
        // SAFETY: header precedes the payload; canary check runs before the
        // flag is trusted.
        let old_size = unsafe {
            (*hdr).check_canary()?;
            if (*hdr).is_freed() {
                return Err(Violation::ResizeAfterFree);
            }
            (*hdr).size()
        };
        let root = self.directory.thread_root();
        // Unlink first: the underlying resize may relocate the header and
        // invalidate its current address.
        // SAFETY: owner-thread list mutation.
        unsafe { (*root).unlink(hdr) };
        let total = HEADER_SIZE
            .checked_add(new_size)
            .ok_or(Violation::OutOfMemory)?;
        // SAFETY: `hdr` is the base of the original system allocation.
        let moved = unsafe { real.resize(hdr.cast(), total) };
        if moved.is_null() {
            return Err(Violation::OutOfMemory);
        }
        let new_hdr = moved.cast::<BlockHeader>();
        // SAFETY: the resized region preserved the header bytes; re-link at
        // the (possibly new) address with the updated size.
        unsafe {
            (*new_hdr).set_size(new_size);
            (*root).push(new_hdr);
        }
        self.metrics.record_resize(old_size, new_size);
        // SAFETY: payload of a non-null allocation is non-null.
        Ok(unsafe { NonNull::new_unchecked(BlockHeader::payload(new_hdr)) })
    }

    /// Release a tracked block. A null `ptr` is a no-op, mirroring the
    /// conventional allocator contract.
    ///
    /// When the block was allocated on a different thread, the unlink scans
    /// only the calling thread's list and silently finds nothing; the
    /// release still proceeds and the owner's list keeps a stale reference
    /// (cross-thread release hazard, documented not patched).
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by this
    /// tracker.
    pub unsafe fn release(&self, ptr: *mut u8) -> Result<(), Violation> {
        if ptr.is_null() {
            return Ok(());
        }
        let real = RealAlloc::try_get()?;
        // SAFETY: caller guarantees `ptr` is one of our payload pointers.
        let hdr = unsafe { BlockHeader::from_payload(ptr) };
        // SAFETY: canary check before flag check, always.
        let size = unsafe {
            (*hdr).check_canary()?;
            if (*hdr).is_freed() {
                return Err(Violation::DoubleFree);
            }
            (*hdr).size()
        };
        let root = self.directory.thread_root();
        // SAFETY: flag flip and owner-thread list mutation precede the
        // memory's return to the system allocator.
        unsafe {
            (*hdr).mark_freed();
            (*root).unlink(hdr);
        }
        self.metrics.record_release(size);
        // SAFETY: `hdr` is the base of the original system allocation.
        unsafe { real.release(hdr.cast()) };
        Ok(())
    }

    /// Exit sweep: walk every registered thread's list, reclaim every block
    /// still flagged Alive, and total them up.
    ///
    /// Runs with the directory locked. By the time this executes the
    /// process is shutting down and owns all registries.
    pub fn sweep(&self) -> LeakSummary {
        let real = RealAlloc::get();
        let mut summary = LeakSummary::default();
        self.directory.for_each_root(|root| {
            // SAFETY: roots have process lifetime; every linked header is
            // either Alive (still allocated) or a stale cross-thread-freed
            // entry whose flag no longer reads Alive.
            unsafe {
                let mut cur = (*root).head();
                while !cur.is_null() {
                    let next = (*cur).next();
                    if (*cur).is_alive() {
                        summary.blocks += 1;
                        summary.bytes += (*cur).size();
                        real.release(cur.cast());
                    }
                    cur = next;
                }
                (*root).clear();
            }
        });
        summary
    }

    /// Fork protocol, before `fork`.
    pub fn fork_prepare(&self) {
        self.directory.fork_prepare();
    }

    /// Fork protocol, in the parent after `fork`.
    pub fn fork_parent(&self) {
        self.directory.fork_parent();
    }

    /// Fork protocol, in the child after `fork`: the child starts tracking
    /// from a clean slate.
    pub fn fork_child(&self) {
        self.directory.fork_child();
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}
