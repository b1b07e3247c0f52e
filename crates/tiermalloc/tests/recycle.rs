//! Full lifecycle: every span installed is recycled once all blocks return.
//!
//! Runs as the only test in this binary so the process-wide counters are
//! deterministic. All cached-size work happens on spawned threads, whose
//! exit flush returns every parked block; the main thread would otherwise
//! retain blocks in its own cache forever.

use std::collections::HashSet;
use std::thread;

use tiermalloc::{allocate, deallocate};

#[test]
fn test_all_spans_recycled_after_full_release() {
    thread::spawn(|| {
        let ptrs: Vec<_> = (0..3000)
            .map(|_| allocate(128).expect("alloc failed"))
            .collect();

        let unique: HashSet<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        assert_eq!(unique.len(), 3000);
        for &addr in &unique {
            assert!(
                tiermalloc::owns_address(addr),
                "cached block outside any page run"
            );
        }

        for ptr in ptrs {
            deallocate(ptr.as_ptr(), 128);
        }
    })
    .join()
    .unwrap();

    let drained = tiermalloc::snapshot();
    assert!(drained.spans_installed > 0);
    assert_eq!(
        drained.spans_recycled, drained.spans_installed,
        "a span outlived the blocks it backed"
    );
    assert!(drained.pages_mapped > 0);
    assert_eq!(drained.pages_unmapped, 0, "nothing unmaps before shutdown");

    // The allocator must remain serviceable: a fresh span gets installed.
    thread::spawn(|| {
        let ptr = allocate(128).expect("alloc failed");
        deallocate(ptr.as_ptr(), 128);
    })
    .join()
    .unwrap();

    let revived = tiermalloc::snapshot();
    assert_eq!(revived.spans_installed, drained.spans_installed + 1);
    assert_eq!(revived.spans_recycled, drained.spans_recycled + 1);
}
