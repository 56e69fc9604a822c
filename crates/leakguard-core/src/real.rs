//! Binding to the system allocator underneath the interposed symbols.
//!
//! Entry points are resolved through `dlsym(RTLD_NEXT, ...)` exactly once,
//! lazily, the first time any interposed function executes. The resolved
//! addresses live in plain atomics rather than a `OnceLock`: under
//! LD_PRELOAD a reentrant call into our own exported symbols during
//! initialization must not park on a futex we already hold.
//!
//! Binding resolves function addresses only; it allocates no tracking
//! state, so it is safe to run before the tracker exists.

use std::ffi::{CStr, c_void};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::report::{self, Violation};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

static REAL_MALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_REALLOC: AtomicUsize = AtomicUsize::new(0);
static REAL_FREE: AtomicUsize = AtomicUsize::new(0);
static BOUND: AtomicBool = AtomicBool::new(false);

/// Resolved entry points of the real system allocator.
#[derive(Clone, Copy)]
pub struct RealAlloc {
    malloc: MallocFn,
    realloc: ReallocFn,
    free: FreeFn,
}

impl RealAlloc {
    /// Bind the system allocator if not already bound.
    ///
    /// Idempotent; concurrent callers resolve the same addresses. Fails only
    /// when `dlsym` cannot locate one of the symbols, which is unrecoverable
    /// for the process.
    pub fn try_bind() -> Result<(), Violation> {
        if BOUND.load(Ordering::Acquire) {
            return Ok(());
        }
        let malloc_addr = resolve(c"malloc");
        let realloc_addr = resolve(c"realloc");
        let free_addr = resolve(c"free");
        if malloc_addr == 0 || realloc_addr == 0 || free_addr == 0 {
            return Err(Violation::SymbolResolution);
        }
        REAL_MALLOC.store(malloc_addr, Ordering::Relaxed);
        REAL_REALLOC.store(realloc_addr, Ordering::Relaxed);
        REAL_FREE.store(free_addr, Ordering::Relaxed);
        BOUND.store(true, Ordering::Release);
        Ok(())
    }

    /// The bound allocator, binding lazily on first use.
    pub fn try_get() -> Result<Self, Violation> {
        Self::try_bind()?;
        // SAFETY: the stored addresses came from dlsym for symbols with
        // exactly these C signatures, and are non-zero once BOUND is set.
        unsafe {
            Ok(Self {
                malloc: mem::transmute::<usize, MallocFn>(REAL_MALLOC.load(Ordering::Relaxed)),
                realloc: mem::transmute::<usize, ReallocFn>(REAL_REALLOC.load(Ordering::Relaxed)),
                free: mem::transmute::<usize, FreeFn>(REAL_FREE.load(Ordering::Relaxed)),
            })
        }
    }

    /// The bound allocator; terminates the process if binding fails.
    ///
    /// Without a working system allocator there is nothing safe left to do.
    #[must_use]
    pub fn get() -> Self {
        match Self::try_get() {
            Ok(real) => real,
            Err(violation) => report::fail(violation),
        }
    }

    /// Request `size` raw bytes from the system allocator.
    ///
    /// # Safety
    ///
    /// Direct call into the system allocator.
    pub unsafe fn allocate(&self, size: usize) -> *mut c_void {
        // SAFETY: bound malloc symbol.
        unsafe { (self.malloc)(size) }
    }

    /// Resize a raw system allocation; may relocate it.
    ///
    /// # Safety
    ///
    /// `raw` must be the base of a live system allocation (or null).
    pub unsafe fn resize(&self, raw: *mut c_void, new_size: usize) -> *mut c_void {
        // SAFETY: bound realloc symbol.
        unsafe { (self.realloc)(raw, new_size) }
    }

    /// Return a raw system allocation.
    ///
    /// # Safety
    ///
    /// `raw` must be the base of a live system allocation (or null), and
    /// must not be used afterwards.
    pub unsafe fn release(&self, raw: *mut c_void) {
        // SAFETY: bound free symbol.
        unsafe { (self.free)(raw) }
    }
}

fn resolve(symbol: &CStr) -> usize {
    // SAFETY: dlsym only inspects loaded objects; RTLD_NEXT skips our own
    // interposing definitions and finds the system allocator beneath.
    unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) as usize }
}
