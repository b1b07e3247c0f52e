//! Tier 2: the central cache.
//!
//! One shard per size class, each behind its own spinlock so unrelated
//! classes make progress independently. A shard holds the class's shared
//! free list plus the page spans backing it, keyed by base address: for any
//! block, the owning span is the last entry at or below its address.
//!
//! Refill sizing follows a slow-start: each central miss requests one more
//! page group from the page cache than the last (a group being the thread
//! tier's per-list byte cap), and the counter halves whenever a fully-free
//! span is recycled. Span occupancy counts blocks held *below* this tier —
//! by thread caches or callers; blocks parked on the shard's own free list
//! keep their bitmap bits clear.

use std::collections::BTreeMap;

use crate::page_cache::PageCache;
use crate::size_class::{self, CLASS_COUNT, OVERSIZE_INDEX};
use crate::span::{BlockChain, BlockList, MemorySpan, PageSpan};
use crate::sync::SpinMutex;
use crate::thread_cache::MAX_FREE_BYTES_PER_LIST;
use crate::{metrics, PAGE_SIZE};

/// Process-wide shared free lists, sharded by size class.
pub struct CentralCache {
    shards: [SpinMutex<ClassShard>; CLASS_COUNT],
}

/// One size class's shared state. Only ever touched under the shard lock.
struct ClassShard {
    free: BlockList,
    /// Page spans of this class, keyed by base address.
    spans: BTreeMap<usize, PageSpan>,
    /// Page groups to request from the page cache on the next miss.
    /// Grows by one per true miss, halves on every span recycle.
    next_page_group_count: usize,
}

impl ClassShard {
    const fn new() -> Self {
        Self {
            free: BlockList::new(),
            spans: BTreeMap::new(),
            next_page_group_count: 1,
        }
    }

    /// Detaches `count` blocks from the free list, recording each as
    /// allocated in its owning span.
    fn pop_allocated(&mut self, count: usize) -> BlockChain {
        debug_assert!(self.free.len() >= count);
        let mut chain = BlockChain::empty();
        for _ in 0..count {
            let Some(block) = self.free.pop() else { break };
            self.mark_allocated(block as usize);
            // SAFETY: the block was on the free list, so it is exclusively
            // ours and at least pointer-width bytes.
            unsafe { chain.push_front(block) };
        }
        debug_assert_eq!(chain.len(), count);
        chain
    }

    fn mark_allocated(&mut self, addr: usize) {
        if let Some((_, span)) = self.spans.range_mut(..=addr).next_back() {
            debug_assert!(span.governs(addr));
            span.mark_allocated(addr);
        } else {
            debug_assert!(false, "block at {addr:#x} has no governing span");
        }
    }

    /// Clears the block's occupancy bit; returns the owning span's base if
    /// the span just became fully free.
    fn return_block(&mut self, addr: usize) -> Option<usize> {
        if let Some((base, span)) = self.spans.range_mut(..=addr).next_back() {
            debug_assert!(span.governs(addr));
            span.clear_allocated(addr);
            if span.is_empty() {
                return Some(*base);
            }
        } else {
            debug_assert!(false, "block at {addr:#x} has no governing span");
        }
        None
    }

    /// Partitions a fresh page run into units, returning the first `count`
    /// as a chain (in carve order) and parking the rest on the free list.
    fn install_run(&mut self, run: MemorySpan, class_size: usize, count: usize) -> BlockChain {
        let mut span = PageSpan::new(run, class_size);
        let unit_count = span.unit_count();
        let take = count.min(unit_count);
        debug_assert_eq!(take, count, "refill batch exceeds page group capacity");

        let mut chain = BlockChain::empty();
        for i in (0..take).rev() {
            let addr = run.base() + i * class_size;
            span.mark_allocated(addr);
            // SAFETY: the unit is fresh memory owned by this shard.
            unsafe { chain.push_front(addr as *mut u8) };
        }
        for i in take..unit_count {
            let addr = run.base() + i * class_size;
            // SAFETY: as above.
            unsafe { self.free.push(addr as *mut u8) };
        }

        self.spans.insert(run.base(), span);
        metrics::note_span_installed();
        chain
    }

    /// Removes the now-empty span at `base`, strips its blocks from the free
    /// list, and hands the pages back.
    fn recycle(&mut self, base: usize, pages: &PageCache) {
        let Some(span) = self.spans.remove(&base) else {
            debug_assert!(false, "recycling a span that is not installed");
            return;
        };
        debug_assert!(span.is_empty());
        let run = span.span();
        let removed = self.free.unlink_within(run.base(), run.end());
        debug_assert_eq!(removed, span.unit_count());

        self.next_page_group_count = (self.next_page_group_count / 2).max(1);
        metrics::note_span_recycled();
        tracing::debug!(
            base = run.base(),
            pages = run.len() / PAGE_SIZE,
            unit_size = span.unit_size(),
            "recycling empty span"
        );
        pages.release_pages(run);
    }
}

impl CentralCache {
    /// Creates a central cache with every shard empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            shards: [const { SpinMutex::new(ClassShard::new()) }; CLASS_COUNT],
        }
    }

    /// Fetches a chain of exactly `count` blocks of `size` bytes.
    ///
    /// `size` must be a class size, or an oversize byte count with
    /// `count == 1`; the thread tier rounds before calling. Returns `None`
    /// when the page cache cannot back a refill.
    pub fn fetch(&self, size: usize, count: usize, pages: &PageCache) -> Option<BlockChain> {
        if size == 0 || count == 0 {
            return None;
        }
        let (class_size, index) = size_class::class_for(size);
        if index == OVERSIZE_INDEX {
            debug_assert_eq!(count, 1);
            let region = pages.allocate_oversize(class_size)?;
            let mut chain = BlockChain::empty();
            // SAFETY: the region is fresh and at least pointer-width bytes.
            unsafe { chain.push_front(region.as_ptr()) };
            return Some(chain);
        }
        debug_assert_eq!(class_size, size);

        let mut shard = self.shards[index].lock();
        metrics::note_central_refill();

        if shard.free.len() >= count {
            return Some(shard.pop_allocated(count));
        }

        let group = shard.next_page_group_count;
        let page_count = (group * MAX_FREE_BYTES_PER_LIST).div_ceil(PAGE_SIZE);
        let run = pages.allocate_pages(page_count)?;
        // Slow start: grow only on a true page-cache invocation, never on
        // the hit path.
        shard.next_page_group_count = group + 1;
        tracing::debug!(
            class_size,
            page_count,
            group,
            base = run.base(),
            "installing page group"
        );
        Some(shard.install_run(run, class_size, count))
    }

    /// Accepts a chain of blocks of `size` bytes back from the thread tier.
    ///
    /// Any span that becomes fully free is stripped from the shard and its
    /// pages returned to the page cache.
    pub fn release(&self, chain: BlockChain, size: usize, pages: &PageCache) {
        if chain.is_empty() {
            return;
        }
        let (class_size, index) = size_class::class_for(size);
        if index == OVERSIZE_INDEX {
            debug_assert_eq!(chain.len(), 1);
            pages.release_oversize(MemorySpan::new(chain.head() as usize, class_size));
            return;
        }

        let mut shard = self.shards[index].lock();
        metrics::note_central_drain();

        let mut chain = chain;
        while let Some(block) = chain.pop_front() {
            let addr = block as usize;
            let emptied = shard.return_block(addr);
            // SAFETY: the caller transferred ownership of the chain; the
            // block is pointer-width aligned and class_size bytes long.
            unsafe { shard.free.push(block) };
            if let Some(base) = emptied {
                shard.recycle(base, pages);
            }
        }
    }

    /// Blocks parked on a class's shared free list.
    #[must_use]
    pub fn free_block_count(&self, index: usize) -> usize {
        self.shards[index].lock().free.len()
    }

    /// Page spans currently installed for a class.
    #[must_use]
    pub fn span_count(&self, index: usize) -> usize {
        self.shards[index].lock().spans.len()
    }

    #[cfg(test)]
    fn page_group_count(&self, index: usize) -> usize {
        self.shards[index].lock().next_page_group_count
    }
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}
