//! Deterministic invariant pressure on the allocation state machine.
//!
//! Seeded xorshift sequences drive allocate/resize/release against a
//! per-slot model, checking the alive-count bookkeeping property: at any
//! point, live blocks == allocations issued - releases completed. This is
//! invariant pressure, not a fuzz campaign.

use serde_json::json;

use leakguard_core::{Tracker, Violation};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

struct Slot {
    ptr: *mut u8,
    size: usize,
    fill: u8,
}

fn fill_region(ptr: *mut u8, size: usize, fill: u8) {
    // SAFETY: `ptr` spans `size` writable payload bytes.
    unsafe { std::ptr::write_bytes(ptr, fill, size) };
}

fn check_region(ptr: *mut u8, size: usize, fill: u8) {
    // SAFETY: `ptr` spans `size` readable payload bytes.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, size) };
    assert!(bytes.iter().all(|b| *b == fill), "payload clobbered");
}

#[test]
fn deterministic_sequences_hold_alive_count_bookkeeping() {
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;

    let mut totals = (0u64, 0u64, 0u64);

    for seed in SEEDS {
        let tracker = Tracker::new();
        let mut rng = XorShift64::new(seed);
        let mut slots: Vec<Option<Slot>> = (0..SLOTS).map(|_| None).collect();
        let mut issued = 0u64;
        let mut completed = 0u64;

        for _ in 0..STEPS {
            let idx = rng.gen_range_usize(0, SLOTS - 1);
            match slots[idx].take() {
                None => {
                    let size = rng.gen_range_usize(1, 256);
                    let fill = (rng.next_u64() & 0xFF) as u8;
                    let ptr = tracker.allocate(size).expect("allocate").as_ptr();
                    fill_region(ptr, size, fill);
                    issued += 1;
                    totals.0 += 1;
                    slots[idx] = Some(Slot { ptr, size, fill });
                }
                Some(slot) if rng.next_u64() & 1 == 0 => {
                    // Resize, verifying the preserved prefix.
                    let new_size = rng.gen_range_usize(1, 512);
                    // SAFETY: `slot.ptr` is a live payload from this tracker.
                    let ptr = unsafe { tracker.resize(slot.ptr, new_size) }
                        .expect("resize")
                        .as_ptr();
                    check_region(ptr, slot.size.min(new_size), slot.fill);
                    fill_region(ptr, new_size, slot.fill);
                    totals.1 += 1;
                    slots[idx] = Some(Slot {
                        ptr,
                        size: new_size,
                        fill: slot.fill,
                    });
                }
                Some(slot) => {
                    check_region(slot.ptr, slot.size, slot.fill);
                    // SAFETY: `slot.ptr` is a live payload from this tracker.
                    unsafe { tracker.release(slot.ptr) }.expect("release");
                    completed += 1;
                    totals.2 += 1;
                }
            }

            let snap = tracker.metrics().snapshot();
            assert_eq!(snap.live_blocks(), issued - completed);
            let live_model: u64 = slots.iter().flatten().count() as u64;
            assert_eq!(snap.live_blocks(), live_model);
        }

        // Drain the survivors; the sweep must then find nothing.
        for slot in slots.iter_mut().filter_map(Option::take) {
            // SAFETY: `slot.ptr` is a live payload from this tracker.
            unsafe { tracker.release(slot.ptr) }.expect("drain release");
        }
        assert!(tracker.sweep().is_clean());
    }

    println!(
        "{}",
        json!({
            "seeds": SEEDS.len(),
            "steps_per_seed": STEPS,
            "allocates": totals.0,
            "resizes": totals.1,
            "releases": totals.2,
        })
    );
}

#[test]
fn resize_of_null_behaves_like_allocate() {
    let tracker = Tracker::new();
    // SAFETY: null is the documented allocate-equivalent input.
    let ptr = unsafe { tracker.resize(std::ptr::null_mut(), 40) }.expect("resize(null)");
    fill_region(ptr.as_ptr(), 40, 0x5A);
    check_region(ptr.as_ptr(), 40, 0x5A);

    let snap = tracker.metrics().snapshot();
    assert_eq!(snap.allocated_blocks, 1);
    assert_eq!(snap.resized_blocks, 0);

    // SAFETY: `ptr` is a live payload from this tracker.
    unsafe { tracker.release(ptr.as_ptr()) }.expect("release");
}

#[test]
fn resize_of_null_to_zero_bytes_still_allocates() {
    let tracker = Tracker::new();
    // SAFETY: null input, zero size: still a fresh tracked block.
    let ptr = unsafe { tracker.resize(std::ptr::null_mut(), 0) }.expect("resize(null, 0)");
    assert_eq!(tracker.metrics().snapshot().live_blocks(), 1);
    // SAFETY: `ptr` is a live payload from this tracker.
    unsafe { tracker.release(ptr.as_ptr()) }.expect("release");
}

#[test]
fn zero_filled_allocation_reads_all_zero() {
    let tracker = Tracker::new();
    let ptr = tracker.allocate_zeroed(8, 16).expect("allocate_zeroed");
    check_region(ptr.as_ptr(), 128, 0);
    // SAFETY: `ptr` is a live payload from this tracker.
    unsafe { tracker.release(ptr.as_ptr()) }.expect("release");
}

#[test]
fn zero_filled_allocation_overflow_reports_out_of_memory() {
    let tracker = Tracker::new();
    assert_eq!(
        tracker.allocate_zeroed(usize::MAX, 2).unwrap_err(),
        Violation::OutOfMemory
    );
}

#[test]
fn release_of_null_is_a_noop() {
    let tracker = Tracker::new();
    // SAFETY: null is the documented no-op input.
    assert_eq!(unsafe { tracker.release(std::ptr::null_mut()) }, Ok(()));
    assert_eq!(tracker.metrics().snapshot().released_blocks, 0);
}

#[test]
fn double_release_is_reported() {
    let tracker = Tracker::new();
    let ptr = tracker.allocate(24).expect("allocate").as_ptr();
    // SAFETY: `ptr` is a live payload from this tracker.
    unsafe { tracker.release(ptr) }.expect("first release");
    // SAFETY: deliberately violating; the stale Freed flag must be seen.
    assert_eq!(unsafe { tracker.release(ptr) }, Err(Violation::DoubleFree));
}

#[test]
fn resize_after_release_is_reported() {
    let tracker = Tracker::new();
    let ptr = tracker.allocate(24).expect("allocate").as_ptr();
    // SAFETY: `ptr` is a live payload from this tracker.
    unsafe { tracker.release(ptr) }.expect("release");
    // SAFETY: deliberately violating; the stale Freed flag must be seen.
    assert_eq!(
        unsafe { tracker.resize(ptr, 64) }.unwrap_err(),
        Violation::ResizeAfterFree
    );
}

#[test]
fn canary_clobber_is_reported_as_corruption() {
    let tracker = Tracker::new();
    let ptr = tracker.allocate(24).expect("allocate").as_ptr();
    // The canary occupies the 16 bytes just before the payload; scribble
    // over it the way an underflowing write would.
    // SAFETY: writing inside our own allocation's header region.
    unsafe { std::ptr::write_bytes(ptr.sub(16), 0, 8) };
    // SAFETY: deliberately violating; the canary check must fire first.
    assert_eq!(
        unsafe { tracker.release(ptr) },
        Err(Violation::HeaderCorruption)
    );
}

#[test]
fn leak_sweep_counts_blocks_and_bytes() {
    let tracker = Tracker::new();
    for size in [16, 32, 64] {
        tracker.allocate(size).expect("allocate");
    }
    let summary = tracker.sweep();
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.bytes, 112);
    // The sweep reclaimed everything; a second pass finds nothing.
    assert!(tracker.sweep().is_clean());
}

#[test]
fn clean_allocate_resize_release_run_sweeps_empty() {
    let tracker = Tracker::new();
    let ptr = tracker.allocate(32).expect("allocate").as_ptr();
    fill_region(ptr, 32, 0xA7);
    // SAFETY: `ptr` is a live payload from this tracker.
    let grown = unsafe { tracker.resize(ptr, 256) }.expect("resize").as_ptr();
    check_region(grown, 32, 0xA7);
    fill_region(grown, 256, 0xB3);
    check_region(grown, 256, 0xB3);
    // SAFETY: `grown` is the live payload after the resize.
    unsafe { tracker.release(grown) }.expect("release");
    assert!(tracker.sweep().is_clean());
}

#[test]
fn blocks_from_finished_threads_are_still_swept() {
    let tracker = Tracker::new();
    std::thread::scope(|s| {
        let tracker = &tracker;
        for size in [48usize, 80] {
            s.spawn(move || {
                tracker.allocate(size).expect("allocate on worker");
            });
        }
    });
    tracker.allocate(8).expect("allocate on main");

    // Registry roots outlive their threads; the sweep sees all three.
    let summary = tracker.sweep();
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.bytes, 48 + 80 + 8);
}

#[test]
fn cross_thread_release_proceeds_without_unlinking() {
    let tracker = Tracker::new();
    let mut addr = 0usize;
    std::thread::scope(|s| {
        s.spawn(|| {
            addr = tracker.allocate(64).expect("allocate on worker").as_ptr() as usize;
        });
    });
    let ptr = addr as *mut u8;

    // Releasing on a non-owner thread succeeds; the unlink scans only this
    // thread's list and silently finds nothing. The owner's list now holds
    // a stale reference, so no sweep runs in this test.
    // SAFETY: `ptr` is a live payload from this tracker.
    assert_eq!(unsafe { tracker.release(ptr) }, Ok(()));
    assert_eq!(tracker.metrics().snapshot().released_blocks, 1);
}
