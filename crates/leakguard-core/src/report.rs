//! Violation taxonomy and diagnostic output.
//!
//! Every detected violation is fatal by design: once the tracking metadata's
//! integrity is suspect, the instrumented program already has undefined
//! behavior, and continuing risks corrupting the system allocator's own
//! state. The fatal path therefore uses only raw `write(2)` and `_exit`,
//! with no buffering, locking, or allocation.

use thiserror::Error;

/// A fatal memory-safety violation observed by the tracking engine.
///
/// None of these are recoverable; callers on the ABI boundary must forward
/// them to [`fail`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The system allocator's entry points could not be resolved.
    #[error("failed to resolve system allocator symbols")]
    SymbolResolution,
    /// The system allocator could not satisfy a request. There is no
    /// null-return fallback; running without memory is not survivable here.
    #[error("system allocator out of memory")]
    OutOfMemory,
    /// A block header's canary did not match the sentinel.
    #[error("block header corrupted (canary mismatch)")]
    HeaderCorruption,
    /// `free` observed a header already marked released.
    #[error("double free of an already released block")]
    DoubleFree,
    /// `realloc` observed a header already marked released.
    #[error("realloc of an already released block")]
    ResizeAfterFree,
}

impl Violation {
    /// Fixed one-line diagnostic for the async-signal-safe fatal path.
    ///
    /// These are complete pre-formatted lines; the fatal path must not run
    /// any formatting machinery.
    #[must_use]
    pub const fn diagnostic(self) -> &'static [u8] {
        match self {
            Self::SymbolResolution => b"leakguard: failed to resolve system allocator symbols\n",
            Self::OutOfMemory => b"leakguard: system allocator out of memory\n",
            Self::HeaderCorruption => b"leakguard: block header corrupted (canary mismatch)\n",
            Self::DoubleFree => b"leakguard: double free of an already released block\n",
            Self::ResizeAfterFree => b"leakguard: realloc of an already released block\n",
        }
    }
}

/// Report a violation on stderr and terminate the process.
///
/// Uses the lowest-level write primitive and `_exit(1)`; the heap may be
/// corrupted at this point, so nothing here may allocate or take a lock.
pub fn fail(violation: Violation) -> ! {
    write_stderr(violation.diagnostic());
    // SAFETY: `_exit` terminates without running atexit handlers or unwinding.
    unsafe { libc::_exit(1) }
}

/// Emit the end-of-process leak line: `leakguard: leak report: N blocks /
/// M bytes leaked`.
pub fn emit_leak_line(blocks: usize, bytes: usize) {
    let mut buf = [0u8; 96];
    let len = format_leak_line(&mut buf, blocks, bytes);
    write_stderr(&buf[..len]);
}

/// Emit the verbose-mode counters line.
pub fn emit_metrics_line(allocated: u64, released: u64, resized: u64) {
    let mut buf = [0u8; 96];
    let mut pos = 0;
    push_bytes(&mut buf, &mut pos, b"leakguard: ");
    push_u64(&mut buf, &mut pos, allocated);
    push_bytes(&mut buf, &mut pos, b" allocs / ");
    push_u64(&mut buf, &mut pos, released);
    push_bytes(&mut buf, &mut pos, b" frees / ");
    push_u64(&mut buf, &mut pos, resized);
    push_bytes(&mut buf, &mut pos, b" reallocs\n");
    write_stderr(&buf[..pos]);
}

fn format_leak_line(buf: &mut [u8], blocks: usize, bytes: usize) -> usize {
    let mut pos = 0;
    push_bytes(buf, &mut pos, b"leakguard: leak report: ");
    push_u64(buf, &mut pos, blocks as u64);
    push_bytes(buf, &mut pos, b" blocks / ");
    push_u64(buf, &mut pos, bytes as u64);
    push_bytes(buf, &mut pos, b" bytes leaked\n");
    pos
}

fn push_bytes(buf: &mut [u8], pos: &mut usize, bytes: &[u8]) {
    let end = (*pos + bytes.len()).min(buf.len());
    let n = end - *pos;
    buf[*pos..end].copy_from_slice(&bytes[..n]);
    *pos = end;
}

fn push_u64(buf: &mut [u8], pos: &mut usize, value: u64) {
    // Decimal digits, most significant first, without any allocation.
    let mut digits = [0u8; 20];
    let mut n = value;
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    push_bytes(buf, pos, &digits[i..]);
}

fn write_stderr(bytes: &[u8]) {
    // SAFETY: plain write(2) to stderr; async-signal-safe, no locking.
    let _ = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
}
