//! Tier 1: the per-thread front end.
//!
//! Each thread owns one cache; the fast paths (local pop, local push) touch
//! no shared state and never block. Misses refill from the central cache in
//! batches that double across successive refills (slow start), and a local
//! list crossing its byte cap drains half of itself back and halves the
//! batch counter — the TCP-style asymmetric response: grow fast while demand
//! holds, shrink faster when it stops.

use std::ptr::NonNull;

use crate::central_cache::CentralCache;
use crate::page_cache::PageCache;
use crate::size_class::{self, CLASS_COUNT, OVERSIZE_INDEX};
use crate::span::{BlockChain, BlockList};
use crate::MAX_UNITS_PER_PAGE;

/// Byte cap per local free list. Crossing it drains half the list back to
/// the central cache in one call.
pub const MAX_FREE_BYTES_PER_LIST: usize = 2 * 1024 * 1024;

/// Floor for the adaptive fetch counter after a drain halves it.
const MIN_FETCH_COUNT: usize = 4;

/// One size class's local state.
struct ClassList {
    free: BlockList,
    /// Batch size target for the next refill; doubles per refill, halves on
    /// drain.
    next_fetch_count: usize,
}

impl ClassList {
    const fn new() -> Self {
        Self {
            free: BlockList::new(),
            next_fetch_count: 0,
        }
    }
}

/// Per-thread free lists for every size class.
///
/// Not `Send`: a cache belongs to the thread that created it. The central
/// and page tiers are passed in explicitly so the cache can be exercised
/// against local tiers in tests; production wiring lives in the allocator
/// facade.
pub struct ThreadCache {
    lists: [ClassList; CLASS_COUNT],
}

impl ThreadCache {
    /// Creates a cache with every list empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lists: [const { ClassList::new() }; CLASS_COUNT],
        }
    }

    /// Allocates `size` bytes. Returns `None` for a zero `size` or when the
    /// tiers below cannot back a refill.
    pub fn allocate(
        &mut self,
        size: usize,
        central: &CentralCache,
        pages: &PageCache,
    ) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let (class_size, index) = size_class::class_for(size);
        if index == OVERSIZE_INDEX {
            let mut chain = central.fetch(class_size, 1, pages)?;
            return NonNull::new(chain.pop_front()?);
        }
        if let Some(block) = self.lists[index].free.pop() {
            return NonNull::new(block);
        }
        self.refill(class_size, index, central, pages)
    }

    /// Returns a block previously allocated with the same `size`.
    pub fn deallocate(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        central: &CentralCache,
        pages: &PageCache,
    ) {
        if size == 0 {
            return;
        }
        let (class_size, index) = size_class::class_for(size);
        if index == OVERSIZE_INDEX {
            let mut chain = BlockChain::empty();
            // SAFETY: the caller hands back exclusive ownership of an
            // oversize region at least pointer-width bytes long.
            unsafe { chain.push_front(ptr.as_ptr()) };
            central.release(chain, class_size, pages);
            return;
        }

        let list = &mut self.lists[index];
        // SAFETY: the caller hands back exclusive ownership of a class_size
        // block; class sizes are at least pointer-width.
        unsafe { list.free.push(ptr.as_ptr()) };

        if list.free.len() * class_size > MAX_FREE_BYTES_PER_LIST {
            let drain = list.free.len() / 2;
            let chain = list.free.pop_chain(drain);
            tracing::debug!(class_size, drained = drain, "draining local list");
            central.release(chain, class_size, pages);
            list.next_fetch_count = (list.next_fetch_count / 2).max(MIN_FETCH_COUNT);
        }
    }

    /// Drains every local list back to the central cache. Called at thread
    /// exit; a cache must not die holding blocks.
    pub fn flush(&mut self, central: &CentralCache, pages: &PageCache) {
        for index in 0..CLASS_COUNT {
            let list = &mut self.lists[index];
            let len = list.free.len();
            if len == 0 {
                continue;
            }
            let chain = list.free.pop_chain(len);
            central.release(chain, size_class::size_of_class(index), pages);
        }
    }

    /// Slow path: fetch a batch from the central cache, hand the first block
    /// to the caller, park the rest locally.
    fn refill(
        &mut self,
        class_size: usize,
        index: usize,
        central: &CentralCache,
        pages: &PageCache,
    ) -> Option<NonNull<u8>> {
        let batch = self.next_batch(class_size, index);
        let mut chain = central.fetch(class_size, batch, pages)?;
        let first = chain.pop_front()?;
        self.lists[index].free.push_chain(chain);
        NonNull::new(first)
    }

    /// Computes this refill's batch and advances the slow-start counter.
    ///
    /// The class-dependent minimum applies every refill, so the counter only
    /// steers once it outgrows the minimum; that is the intended warm-up
    /// amortisation.
    fn next_batch(&mut self, class_size: usize, index: usize) -> usize {
        let list = &mut self.lists[index];
        let minimum = if class_size <= 64 { 32 } else { 16 };
        let batch = clamp_batch(list.next_fetch_count.max(minimum), class_size);
        list.next_fetch_count = clamp_batch(batch * 2, class_size);
        batch
    }

    #[cfg(test)]
    fn list_len(&self, index: usize) -> usize {
        self.lists[index].free.len()
    }

    #[cfg(test)]
    fn fetch_count(&self, index: usize) -> usize {
        self.lists[index].next_fetch_count
    }
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the per-class batch ceilings: a count cap by object size, half
/// the list byte cap, and the per-page unit ceiling.
fn clamp_batch(count: usize, class_size: usize) -> usize {
    let cap = if class_size <= 128 {
        256
    } else if class_size <= 1024 {
        128
    } else {
        64
    };
    count
        .min(cap)
        .min(MAX_FREE_BYTES_PER_LIST / (2 * class_size))
        .min(MAX_UNITS_PER_PAGE)
}
