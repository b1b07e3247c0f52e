//! Allocator-wide counters.
//!
//! Slow-path events only: nothing here is touched on a thread-cache hit.
//! Counters are monotonic and relaxed; a snapshot is a consistent-enough
//! view for tests and diagnostics, not an atomic cross-counter read.

use std::sync::atomic::{AtomicU64, Ordering};

static OS_MAPPINGS: AtomicU64 = AtomicU64::new(0);
static PAGES_MAPPED: AtomicU64 = AtomicU64::new(0);
static PAGES_UNMAPPED: AtomicU64 = AtomicU64::new(0);
static SPANS_INSTALLED: AtomicU64 = AtomicU64::new(0);
static SPANS_RECYCLED: AtomicU64 = AtomicU64::new(0);
static CENTRAL_REFILLS: AtomicU64 = AtomicU64::new(0);
static CENTRAL_DRAINS: AtomicU64 = AtomicU64::new(0);
static OVERSIZE_ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static OVERSIZE_RELEASES: AtomicU64 = AtomicU64::new(0);

/// Point-in-time view of the allocator's slow-path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Bulk mappings obtained from the OS.
    pub os_mappings: u64,
    /// Pages obtained from the OS, cumulative.
    pub pages_mapped: u64,
    /// Pages returned to the OS (at shutdown), cumulative.
    pub pages_unmapped: u64,
    /// Page spans installed into central-cache class maps.
    pub spans_installed: u64,
    /// Fully-free page spans recycled back to the page cache.
    pub spans_recycled: u64,
    /// Thread-cache refills serviced by the central cache.
    pub central_refills: u64,
    /// Thread-cache drains absorbed by the central cache.
    pub central_drains: u64,
    /// Oversize requests serviced by the system heap.
    pub oversize_allocations: u64,
    /// Oversize regions returned to the system heap.
    pub oversize_releases: u64,
}

/// Reads all counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        os_mappings: OS_MAPPINGS.load(Ordering::Relaxed),
        pages_mapped: PAGES_MAPPED.load(Ordering::Relaxed),
        pages_unmapped: PAGES_UNMAPPED.load(Ordering::Relaxed),
        spans_installed: SPANS_INSTALLED.load(Ordering::Relaxed),
        spans_recycled: SPANS_RECYCLED.load(Ordering::Relaxed),
        central_refills: CENTRAL_REFILLS.load(Ordering::Relaxed),
        central_drains: CENTRAL_DRAINS.load(Ordering::Relaxed),
        oversize_allocations: OVERSIZE_ALLOCATIONS.load(Ordering::Relaxed),
        oversize_releases: OVERSIZE_RELEASES.load(Ordering::Relaxed),
    }
}

pub(crate) fn note_os_mapping(pages: usize) {
    OS_MAPPINGS.fetch_add(1, Ordering::Relaxed);
    PAGES_MAPPED.fetch_add(pages as u64, Ordering::Relaxed);
}

pub(crate) fn note_pages_unmapped(pages: usize) {
    PAGES_UNMAPPED.fetch_add(pages as u64, Ordering::Relaxed);
}

pub(crate) fn note_span_installed() {
    SPANS_INSTALLED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_span_recycled() {
    SPANS_RECYCLED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_central_refill() {
    CENTRAL_REFILLS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_central_drain() {
    CENTRAL_DRAINS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_oversize_allocation() {
    OVERSIZE_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn note_oversize_release() {
    OVERSIZE_RELEASES.fetch_add(1, Ordering::Relaxed);
}
