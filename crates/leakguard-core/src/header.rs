//! Intrusive block header prefixed to every tracked allocation.
//!
//! The header sits immediately before the payload pointer handed to the
//! application. Its canary is a fixed sentinel checked before the header is
//! trusted at every operation entry point; the lifecycle flag is stored as a
//! raw word rather than a Rust enum because a corrupted header must never be
//! reinterpreted as a typed value.
//!
//! The canary only guards the header region itself (writes landing just
//! before the payload); it is not a general overflow detector.

use std::ptr;

use crate::report::Violation;

/// Fixed sentinel written into every live header.
pub const BLOCK_CANARY: u64 = 0xD0D0_FACE_CA11_0C8D;

/// Lifecycle flag: block is tracked and owned by the application.
const STATE_ALIVE: u64 = 0x0000_0000_0000_A11E;

/// Lifecycle flag: block was released; any further operation is a violation.
const STATE_FREED: u64 = 0x0000_0000_0000_F4EE;

/// Per-allocation metadata, laid out immediately before the payload.
///
/// 32 bytes on 64-bit targets so that payloads keep 16-byte alignment
/// relative to what the system allocator returned.
#[repr(C)]
pub struct BlockHeader {
    size: usize,
    next: *mut BlockHeader,
    canary: u64,
    state: u64,
}

/// Byte distance between the header base and the payload it guards.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

impl BlockHeader {
    /// Write a fresh Alive header at `hdr` with the given payload size.
    ///
    /// # Safety
    ///
    /// `hdr` must point to at least `HEADER_SIZE` writable bytes.
    pub unsafe fn initialize(hdr: *mut BlockHeader, size: usize) {
        // SAFETY: caller guarantees the header region is writable.
        unsafe {
            hdr.write(BlockHeader {
                size,
                next: ptr::null_mut(),
                canary: BLOCK_CANARY,
                state: STATE_ALIVE,
            });
        }
    }

    /// Recover the header address from a payload pointer.
    ///
    /// # Safety
    ///
    /// `payload` must have been produced by [`BlockHeader::payload`] for a
    /// tracked allocation, or the result dereferences foreign memory.
    #[must_use]
    pub unsafe fn from_payload(payload: *mut u8) -> *mut BlockHeader {
        // SAFETY: the header was placed HEADER_SIZE bytes before the payload.
        unsafe { payload.sub(HEADER_SIZE) }.cast()
    }

    /// Payload address guarded by the header at `hdr`.
    ///
    /// # Safety
    ///
    /// `hdr` must be the base of a tracked allocation of at least
    /// `HEADER_SIZE` bytes.
    #[must_use]
    pub unsafe fn payload(hdr: *mut BlockHeader) -> *mut u8 {
        // SAFETY: the allocation extends HEADER_SIZE bytes past the header.
        unsafe { hdr.cast::<u8>().add(HEADER_SIZE) }
    }

    /// Structural integrity check. Must run before the lifecycle flag is
    /// consulted: corruption may have clobbered the flag as well.
    pub fn check_canary(&self) -> Result<(), Violation> {
        if self.canary == BLOCK_CANARY {
            Ok(())
        } else {
            Err(Violation::HeaderCorruption)
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state == STATE_ALIVE
    }

    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.state == STATE_FREED
    }

    /// Transition to the terminal Freed state.
    pub fn mark_freed(&mut self) {
        self.state = STATE_FREED;
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Update the payload size after a resize relocated the block.
    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    #[must_use]
    pub fn next(&self) -> *mut BlockHeader {
        self.next
    }

    pub fn set_next(&mut self, next: *mut BlockHeader) {
        self.next = next;
    }
}
