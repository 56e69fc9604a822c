//! Per-thread registry lists and the global thread directory.
//!
//! Each thread owns a singly linked intrusive list of the block headers it
//! allocated. Only the owning thread mutates its list during allocate,
//! resize, and release, so the hot path takes no lock. The global directory
//! records every thread's registry root under a single mutex acquired only
//! at first-allocation registration, around fork, and for the exit sweep.
//!
//! Registry roots are heap-allocated and never reclaimed: a root must stay
//! valid for the exit sweep even after its owning thread has terminated, so
//! roots get process lifetime rather than thread-local storage duration.

use std::cell::Cell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::header::BlockHeader;

/// Directory generations never repeat, so a stale thread-local root can
/// never be mistaken for one registered with the current directory.
static NEXT_DIRECTORY_GENERATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// This thread's registry root, tagged with the generation of the
    /// directory it is registered in; (0, null) until the thread's first
    /// tracked allocation.
    static THREAD_ROOT: Cell<(u64, *mut RegistryRoot)> =
        const { Cell::new((0, ptr::null_mut())) };
}

/// Head of one thread's intrusive list of tracked block headers.
///
/// Mutated only by the owning thread, the exit sweep (which by then owns the
/// whole process), or a freshly forked child (which is single-threaded).
pub struct RegistryRoot {
    head: Cell<*mut BlockHeader>,
}

impl RegistryRoot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: Cell::new(ptr::null_mut()),
        }
    }

    #[must_use]
    pub fn head(&self) -> *mut BlockHeader {
        self.head.get()
    }

    /// Drop every list entry without touching the headers themselves.
    pub fn clear(&self) {
        self.head.set(ptr::null_mut());
    }

    /// Link a freshly initialized header at the list head. O(1).
    ///
    /// # Safety
    ///
    /// `hdr` must point to a valid header not currently linked into any
    /// list, and the caller must be the sole mutator of this root.
    pub unsafe fn push(&self, hdr: *mut BlockHeader) {
        // SAFETY: caller guarantees `hdr` is valid and unlinked.
        unsafe { (*hdr).set_next(self.head.get()) };
        self.head.set(hdr);
    }

    /// Unlink `hdr` if present; linear scan of this thread's list.
    ///
    /// Silently finds nothing when the header lives in another thread's
    /// list; the cross-thread release hazard is preserved, not patched.
    ///
    /// # Safety
    ///
    /// Every header reachable from this root must still be readable, and
    /// the caller must be the sole mutator of this root.
    pub unsafe fn unlink(&self, hdr: *mut BlockHeader) {
        let mut cur = self.head.get();
        if cur == hdr {
            // SAFETY: `cur` is a linked, readable header.
            self.head.set(unsafe { (*cur).next() });
            return;
        }
        while !cur.is_null() {
            // SAFETY: `cur` is a linked, readable header.
            let next = unsafe { (*cur).next() };
            if next == hdr {
                // SAFETY: both `cur` and `hdr` are readable headers.
                unsafe { (*cur).set_next((*hdr).next()) };
                return;
            }
            cur = next;
        }
    }
}

impl Default for RegistryRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory entry: the address of one thread's registry root.
pub(crate) struct RootHandle(pub(crate) *mut RegistryRoot);

// SAFETY: a root is only dereferenced by its owner thread, the exit sweep,
// or a freshly forked child; the directory mutex serializes the latter two
// against registration.
unsafe impl Send for RootHandle {}

/// Mutex-guarded list of every thread's registry root.
///
/// Used only for enumeration (exit sweep) and the fork protocol, never on
/// the per-allocation hot path.
pub struct GlobalDirectory {
    generation: u64,
    roots: Mutex<Vec<RootHandle>>,
}

impl GlobalDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: NEXT_DIRECTORY_GENERATION.fetch_add(1, Ordering::Relaxed),
            roots: Mutex::new(Vec::new()),
        }
    }

    /// The calling thread's registry root, creating and registering it on
    /// first use.
    ///
    /// The `Box` here may recurse into the interposed `malloc`; the ABI
    /// layer's reentry guard routes that inner call straight to the system
    /// allocator, so registration itself is never tracked.
    pub fn thread_root(&self) -> *mut RegistryRoot {
        THREAD_ROOT.with(|cell| {
            let (generation, existing) = cell.get();
            if generation == self.generation && !existing.is_null() {
                return existing;
            }
            let root = Box::into_raw(Box::new(RegistryRoot::new()));
            self.roots.lock().push(RootHandle(root));
            cell.set((self.generation, root));
            root
        })
    }

    /// Run `visit` over every registered root with the directory locked.
    pub(crate) fn for_each_root(&self, mut visit: impl FnMut(*mut RegistryRoot)) {
        let guard = self.roots.lock();
        for handle in guard.iter() {
            visit(handle.0);
        }
    }

    /// Fork protocol, before `fork`: hold the directory mutex across the
    /// fork so the child never captures it mid-mutation.
    pub fn fork_prepare(&self) {
        mem::forget(self.roots.lock());
    }

    /// Fork protocol, in the parent after `fork`: release the mutex taken
    /// by [`GlobalDirectory::fork_prepare`].
    pub fn fork_parent(&self) {
        // SAFETY: fork_prepare locked this mutex and forgot the guard.
        unsafe { self.roots.force_unlock() };
    }

    /// Fork protocol, in the child after `fork`: discard every inherited
    /// directory entry and reset the calling thread's own root.
    ///
    /// Only the forking thread survives into the child; every other
    /// thread's registry is dangling there and must never be traversed.
    /// Blocks inherited via copy-on-write become untracked in the child.
    pub fn fork_child(&self) {
        // SAFETY: fork_prepare locked this mutex and forgot the guard; the
        // child is single-threaded, so re-locking below cannot contend.
        unsafe { self.roots.force_unlock() };
        self.roots.lock().clear();
        THREAD_ROOT.with(|cell| {
            let (_, root) = cell.get();
            if !root.is_null() {
                // SAFETY: the root outlives its thread by construction.
                unsafe { (*root).clear() };
            }
            cell.set((0, ptr::null_mut()));
        });
    }
}

impl Default for GlobalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{BlockHeader, HEADER_SIZE};
    use crate::real::RealAlloc;

    unsafe fn raw_header(size: usize) -> *mut BlockHeader {
        let real = RealAlloc::try_get().unwrap();
        // SAFETY: header-sized system allocation, initialized before use.
        unsafe {
            let hdr = real.allocate(HEADER_SIZE).cast::<BlockHeader>();
            assert!(!hdr.is_null());
            BlockHeader::initialize(hdr, size);
            hdr
        }
    }

    unsafe fn free_header(hdr: *mut BlockHeader) {
        let real = RealAlloc::try_get().unwrap();
        // SAFETY: `hdr` came from raw_header above.
        unsafe { real.release(hdr.cast()) };
    }

    fn collect(root: &RegistryRoot) -> Vec<*mut BlockHeader> {
        let mut out = Vec::new();
        let mut cur = root.head();
        while !cur.is_null() {
            out.push(cur);
            // SAFETY: every collected header is still allocated in tests.
            cur = unsafe { (*cur).next() };
        }
        out
    }

    #[test]
    fn push_links_at_head_and_unlink_removes_anywhere() {
        let root = RegistryRoot::new();
        // SAFETY: headers allocated and initialized by the helper.
        unsafe {
            let a = raw_header(1);
            let b = raw_header(2);
            let c = raw_header(3);
            root.push(a);
            root.push(b);
            root.push(c);
            assert_eq!(collect(&root), vec![c, b, a]);

            // Middle entry.
            root.unlink(b);
            assert_eq!(collect(&root), vec![c, a]);
            // Head entry.
            root.unlink(c);
            assert_eq!(collect(&root), vec![a]);
            // Tail entry.
            root.unlink(a);
            assert!(collect(&root).is_empty());

            free_header(a);
            free_header(b);
            free_header(c);
        }
    }

    #[test]
    fn unlink_of_foreign_header_is_a_silent_noop() {
        let root = RegistryRoot::new();
        // SAFETY: headers allocated and initialized by the helper.
        unsafe {
            let a = raw_header(1);
            let stranger = raw_header(2);
            root.push(a);
            root.unlink(stranger);
            assert_eq!(collect(&root), vec![a]);
            free_header(a);
            free_header(stranger);
        }
    }

    #[test]
    fn directory_registers_each_thread_once() {
        let directory = GlobalDirectory::new();
        let first = directory.thread_root();
        let second = directory.thread_root();
        assert_eq!(first, second);

        let mut seen = 0;
        directory.for_each_root(|root| {
            assert_eq!(root, first);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }
}
