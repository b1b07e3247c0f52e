//! Process-wide wiring: tier singletons, thread-local caches, public API.
//!
//! The page cache and central cache are process-wide statics built in const
//! context; the thread cache lives in thread-local storage and drains itself
//! back to the central tier when its thread exits. During thread teardown,
//! when TLS is no longer available, requests fall through to the central
//! cache with batch size one.

use std::cell::UnsafeCell;
use std::ptr::NonNull;

use crate::central_cache::CentralCache;
use crate::page_cache::PageCache;
use crate::size_class;
use crate::span::BlockChain;
use crate::thread_cache::ThreadCache;

static PAGE_CACHE: PageCache = PageCache::new();
static CENTRAL_CACHE: CentralCache = CentralCache::new();

struct TlsCache(UnsafeCell<ThreadCache>);

impl Drop for TlsCache {
    fn drop(&mut self) {
        // Thread exit: every block still parked locally goes back to the
        // central tier. A cache must not die holding blocks.
        self.0.get_mut().flush(&CENTRAL_CACHE, &PAGE_CACHE);
    }
}

thread_local! {
    static THREAD_CACHE: TlsCache = TlsCache(UnsafeCell::new(ThreadCache::new()));
}

/// Runs `f` against this thread's cache. Returns `None` if TLS is gone
/// (thread startup/teardown).
#[inline]
fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
    THREAD_CACHE
        .try_with(|cache| {
            // SAFETY: the cache is only ever touched from its own thread,
            // and the tiers below use the system heap for their metadata,
            // so nothing inside `f` re-enters this cell.
            unsafe { f(&mut *cache.0.get()) }
        })
        .ok()
}

/// Allocates `size` bytes of uninitialised memory.
///
/// The returned address is aligned to at least the pointer width. Returns
/// `None` for `size == 0` and when the OS refuses to back the request.
#[must_use]
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    if let Some(result) = with_thread_cache(|tc| tc.allocate(size, &CENTRAL_CACHE, &PAGE_CACHE)) {
        return result;
    }
    // TLS unavailable: fetch a single block straight from the central tier.
    let (class_size, _) = size_class::class_for(size);
    let mut chain = CENTRAL_CACHE.fetch(class_size, 1, &PAGE_CACHE)?;
    NonNull::new(chain.pop_front()?)
}

/// Releases a block previously returned by [`allocate`].
///
/// `size` must equal the size passed to the matching [`allocate`] call.
/// Deallocating a null pointer or a zero `size` is a no-op.
pub fn deallocate(ptr: *mut u8, size: usize) {
    let Some(ptr) = NonNull::new(ptr) else { return };
    if size == 0 {
        return;
    }
    if with_thread_cache(|tc| tc.deallocate(ptr, size, &CENTRAL_CACHE, &PAGE_CACHE)).is_some() {
        return;
    }
    // TLS unavailable: hand the single block to the central tier.
    let (class_size, _) = size_class::class_for(size);
    let mut chain = BlockChain::empty();
    // SAFETY: the caller transfers exclusive ownership of the block, which
    // is at least pointer-width bytes.
    unsafe { chain.push_front(ptr.as_ptr()) };
    CENTRAL_CACHE.release(chain, class_size, &PAGE_CACHE);
}

/// Unmaps every page run obtained from the OS. Idempotent.
///
/// Outstanding allocations are invalidated; no allocator call may follow.
pub fn shutdown() {
    PAGE_CACHE.shutdown();
}

/// Whether `addr` lies inside a page run the allocator obtained from the OS.
///
/// Diagnostic: every address returned by [`allocate`] for a cached size
/// satisfies this until shutdown. Oversize regions live on the system heap
/// and do not.
#[must_use]
pub fn owns_address(addr: usize) -> bool {
    PAGE_CACHE.owns(addr)
}
