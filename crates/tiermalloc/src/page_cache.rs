//! Tier 3: the page cache.
//!
//! Obtains page runs from the OS in bulk and hands exact page counts down to
//! the central cache. Free runs are held under two cooperating indices: a
//! by-length multiset for best-fit allocation and a by-address map for
//! coalescing on release. Adjacent free runs are always merged, so no two
//! indexed runs are physically contiguous.
//!
//! Every OS mapping is retained for the lifetime of the process and unmapped
//! only by [`PageCache::shutdown`]; the transient free-run indices never own
//! the memory they name.

use std::alloc::{GlobalAlloc, Layout, System};
use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use sys_pages::PageRun;

use crate::span::MemorySpan;
use crate::{metrics, ALIGNMENT, PAGE_SIZE};

/// Floor on the page count of a single OS request. Amortises the system
/// call across many small allocations.
pub const BULK_PAGES: usize = 2048;

/// Cap on merge steps per direction when coalescing a released run. Free
/// runs are already coalesced, so one step per side is the norm; the bound
/// guards against pathological index states.
const MAX_COALESCE_STEPS: usize = 100;

/// Process-wide store of free page runs.
pub struct PageCache {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Free runs keyed by page count, for best-fit allocation.
    free_by_len: BTreeMap<usize, BTreeSet<MemorySpan>>,
    /// Free runs keyed by base address, for coalescing on release.
    free_by_addr: BTreeMap<usize, MemorySpan>,
    /// Every mapping obtained from the OS, held until shutdown.
    retained: Vec<PageRun>,
    shut_down: bool,
}

impl PageCache {
    /// Creates an empty page cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                free_by_len: BTreeMap::new(),
                free_by_addr: BTreeMap::new(),
                retained: Vec::new(),
                shut_down: false,
            }),
        }
    }

    /// Allocates a run of exactly `page_count` pages.
    ///
    /// Best-fit: the smallest indexed run of at least `page_count` pages is
    /// split, the remainder re-indexed. On a miss the OS is asked for
    /// `max(page_count, BULK_PAGES)` pages. Returns `None` if `page_count`
    /// is zero or the OS refuses the mapping.
    pub fn allocate_pages(&self, page_count: usize) -> Option<MemorySpan> {
        if page_count == 0 {
            return None;
        }
        let mut inner = self.inner.lock();

        if let Some(run) = inner.take_best_fit(page_count) {
            return Some(inner.carve(run, page_count));
        }

        let bulk = page_count.max(BULK_PAGES);
        let mapping = match sys_pages::map_anon(bulk * PAGE_SIZE) {
            Ok(mapping) => mapping,
            Err(err) => {
                tracing::warn!(pages = bulk, %err, "OS refused page mapping");
                return None;
            }
        };
        tracing::debug!(pages = bulk, base = mapping.base() as usize, "mapped bulk page run");
        metrics::note_os_mapping(bulk);

        let run = MemorySpan::new(mapping.base() as usize, mapping.len());
        inner.retained.push(mapping);
        Some(inner.carve(run, page_count))
    }

    /// Returns a previously carved page-multiple run to the cache, merging
    /// it with physically adjacent free runs.
    pub fn release_pages(&self, run: MemorySpan) {
        debug_assert!(!run.is_empty());
        debug_assert_eq!(run.len() % PAGE_SIZE, 0);
        self.inner.lock().release(run);
    }

    /// Services a request above the cache ceiling from the system heap.
    ///
    /// Not the mmap path: oversize regions come and go too irregularly to be
    /// worth retaining.
    pub fn allocate_oversize(&self, size: usize) -> Option<MemorySpan> {
        let layout = Layout::from_size_align(size, ALIGNMENT).ok()?;
        // SAFETY: layout has non-zero size; the region is released with the
        // same layout in `release_oversize`.
        let ptr = unsafe { System.alloc(layout) };
        if ptr.is_null() {
            tracing::warn!(size, "system heap refused oversize allocation");
            return None;
        }
        metrics::note_oversize_allocation();
        Some(MemorySpan::new(ptr as usize, size))
    }

    /// Returns an oversize region to the system heap.
    pub fn release_oversize(&self, region: MemorySpan) {
        let Ok(layout) = Layout::from_size_align(region.len(), ALIGNMENT) else {
            debug_assert!(false, "oversize region with impossible layout");
            return;
        };
        // SAFETY: `region` came from `allocate_oversize` with this layout.
        unsafe { System.dealloc(region.as_ptr(), layout) };
        metrics::note_oversize_release();
    }

    /// Unmaps every retained OS mapping. Idempotent; the free-run indices
    /// are cleared along with the memory they described.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        inner.free_by_len.clear();
        inner.free_by_addr.clear();
        let retained = std::mem::take(&mut inner.retained);
        let pages: usize = retained.iter().map(|run| run.len() / PAGE_SIZE).sum();
        tracing::debug!(mappings = retained.len(), pages, "unmapping retained runs");
        metrics::note_pages_unmapped(pages);
        drop(retained);
    }

    /// Whether `addr` lies inside any OS mapping this cache has obtained.
    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        self.inner.lock().retained.iter().any(|run| run.contains(addr))
    }

    /// Number of distinct free runs currently indexed.
    #[must_use]
    pub fn free_run_count(&self) -> usize {
        self.inner.lock().free_by_addr.len()
    }

    /// Total pages across all indexed free runs.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.inner
            .lock()
            .free_by_addr
            .values()
            .map(|run| run.len() / PAGE_SIZE)
            .sum()
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Removes and returns the smallest free run of at least `page_count`
    /// pages.
    fn take_best_fit(&mut self, page_count: usize) -> Option<MemorySpan> {
        let run = {
            let (_, runs) = self.free_by_len.range(page_count..).next()?;
            *runs.iter().next()?
        };
        self.remove_free(&run);
        Some(run)
    }

    /// Splits the leading `page_count` pages off `run` for the caller and
    /// re-indexes any remainder.
    fn carve(&mut self, run: MemorySpan, page_count: usize) -> MemorySpan {
        debug_assert!(run.len() >= page_count * PAGE_SIZE);
        let (head, rest) = run.split_at(page_count * PAGE_SIZE);
        if !rest.is_empty() {
            self.insert_free(rest);
        }
        head
    }

    fn release(&mut self, run: MemorySpan) {
        debug_assert!(!self.free_by_addr.contains_key(&run.base()));
        let mut merged = run;

        // Merge left: predecessors whose end touches our base.
        let mut steps = 0;
        while steps < MAX_COALESCE_STEPS {
            let Some((_, &prev)) = self.free_by_addr.range(..merged.base()).next_back() else {
                break;
            };
            if prev.end() != merged.base() {
                break;
            }
            self.remove_free(&prev);
            merged = MemorySpan::new(prev.base(), prev.len() + merged.len());
            steps += 1;
        }

        // Merge right: successors starting exactly at our end.
        let mut steps = 0;
        while steps < MAX_COALESCE_STEPS {
            let Some(&next) = self.free_by_addr.get(&merged.end()) else {
                break;
            };
            self.remove_free(&next);
            merged = MemorySpan::new(merged.base(), merged.len() + next.len());
            steps += 1;
        }

        self.insert_free(merged);
    }

    fn insert_free(&mut self, run: MemorySpan) {
        debug_assert!(!run.is_empty());
        debug_assert_eq!(run.len() % PAGE_SIZE, 0);
        self.free_by_len
            .entry(run.len() / PAGE_SIZE)
            .or_default()
            .insert(run);
        self.free_by_addr.insert(run.base(), run);
    }

    fn remove_free(&mut self, run: &MemorySpan) {
        let pages = run.len() / PAGE_SIZE;
        if let Some(runs) = self.free_by_len.get_mut(&pages) {
            runs.remove(run);
            if runs.is_empty() {
                self.free_by_len.remove(&pages);
            }
        }
        self.free_by_addr.remove(&run.base());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pages_rejected() {
        let cache = PageCache::new();
        assert!(cache.allocate_pages(0).is_none());
    }

    #[test]
    fn test_bulk_floor_and_remainder() {
        let cache = PageCache::new();
        let run = cache.allocate_pages(1).expect("mapping failed");
        assert_eq!(run.len(), PAGE_SIZE);
        assert_eq!(run.base() % PAGE_SIZE, 0);
        // The rest of the bulk mapping is indexed as one free run.
        assert_eq!(cache.free_run_count(), 1);
        assert_eq!(cache.free_page_count(), BULK_PAGES - 1);
    }

    #[test]
    fn test_release_recoalesces_into_bulk_run() {
        let cache = PageCache::new();
        let run = cache.allocate_pages(3).expect("mapping failed");
        cache.release_pages(run);
        assert_eq!(cache.free_run_count(), 1);
        assert_eq!(cache.free_page_count(), BULK_PAGES);
    }

    #[test]
    fn test_best_fit_prefers_smallest_sufficient_run() {
        let cache = PageCache::new();
        // Lay out: a(4) gap(1) c(8) gap(1), then free a and c.
        let a = cache.allocate_pages(4).unwrap();
        let _gap1 = cache.allocate_pages(1).unwrap();
        let c = cache.allocate_pages(8).unwrap();
        let _gap2 = cache.allocate_pages(1).unwrap();
        cache.release_pages(a);
        cache.release_pages(c);

        // Both 4-page and 8-page runs satisfy 3 pages; best fit carves the
        // 4-page run.
        let got = cache.allocate_pages(3).unwrap();
        assert_eq!(got.base(), a.base());
    }

    #[test]
    fn test_coalescing_reduces_entry_count_by_adjacency() {
        let cache = PageCache::new();
        let a = cache.allocate_pages(2).unwrap();
        let b = cache.allocate_pages(2).unwrap();
        let c = cache.allocate_pages(2).unwrap();
        let _plug = cache.allocate_pages(1).unwrap();
        assert_eq!(a.end(), b.base());
        assert_eq!(b.end(), c.base());

        let baseline = cache.free_run_count();

        // No adjacency: +1 entry each.
        cache.release_pages(a);
        assert_eq!(cache.free_run_count(), baseline + 1);
        cache.release_pages(c);
        assert_eq!(cache.free_run_count(), baseline + 2);

        // Two adjacencies: a+b+c fuse, net change -1.
        cache.release_pages(b);
        assert_eq!(cache.free_run_count(), baseline + 1);

        let fused = cache
            .allocate_pages(6)
            .expect("fused run should satisfy 6 pages");
        assert_eq!(fused.base(), a.base());
    }

    #[test]
    fn test_exact_fit_leaves_no_remainder_entry() {
        let cache = PageCache::new();
        let run = cache.allocate_pages(5).unwrap();
        let _plug = cache.allocate_pages(1).unwrap();
        cache.release_pages(run);
        let count = cache.free_run_count();
        let again = cache.allocate_pages(5).unwrap();
        assert_eq!(again.base(), run.base());
        assert_eq!(cache.free_run_count(), count - 1);
    }

    #[test]
    fn test_owns_covers_carved_runs() {
        let cache = PageCache::new();
        let run = cache.allocate_pages(2).unwrap();
        assert!(cache.owns(run.base()));
        assert!(cache.owns(run.end() - 1));
        assert!(!cache.owns(0x10));
    }

    #[test]
    fn test_oversize_round_trip() {
        let cache = PageCache::new();
        let region = cache.allocate_oversize(1024 * 1024).expect("oversize failed");
        assert_eq!(region.base() % ALIGNMENT, 0);
        unsafe {
            region.as_ptr().write(0xFF);
            region.as_ptr().add(region.len() - 1).write(0xFF);
            assert_eq!(region.as_ptr().read(), 0xFF);
            assert_eq!(region.as_ptr().add(region.len() - 1).read(), 0xFF);
        }
        cache.release_oversize(region);
    }

    #[test]
    fn test_shutdown_idempotent() {
        let cache = PageCache::new();
        let run = cache.allocate_pages(2).unwrap();
        let base = run.base();
        cache.release_pages(run);

        cache.shutdown();
        assert_eq!(cache.free_run_count(), 0);
        assert!(!cache.owns(base));
        cache.shutdown();
    }
}
