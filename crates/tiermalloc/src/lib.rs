//! A three-tier caching memory allocator.
//!
//! `tiermalloc` services raw, uninitialised byte allocations through a cache
//! hierarchy tuned for high-concurrency small-object workloads:
//!
//! - **Thread cache** (tier 1): per-thread free lists, zero synchronisation
//!   on the fast path.
//! - **Central cache** (tier 2): process-wide free lists sharded by size
//!   class, one spinlock per class, page-span bookkeeping so fully-free runs
//!   can be recycled.
//! - **Page cache** (tier 3): process-wide store of coalesced page runs
//!   obtained from the OS in bulk.
//!
//! Batch sizes between the tiers adapt with a TCP-style response: doubling
//! slow-start on refill, halving on pressure.
//!
//! # Quick Start
//!
//! ```
//! let ptr = tiermalloc::allocate(64).expect("out of memory");
//! unsafe { ptr.as_ptr().write_bytes(0xAB, 64) };
//! tiermalloc::deallocate(ptr.as_ptr(), 64);
//! ```
//!
//! # The size contract
//!
//! The interface is *sized-free*: the byte count passed to [`deallocate`]
//! must equal the count passed to the matching [`allocate`]. There are no
//! per-allocation headers; the allocator trusts the caller's size.
//!
//! # Alignment
//!
//! Every returned address is aligned to at least the machine pointer width.
//! Stronger alignments are not supported.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod central_cache;
pub mod metrics;
pub mod page_cache;
pub mod size_class;
pub mod span;
pub mod sync;
pub mod thread_cache;

mod allocator;

/// Virtual page size assumed by the page cache, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Alignment guaranteed for every returned address: the pointer width.
pub const ALIGNMENT: usize = std::mem::size_of::<usize>();

/// Largest request serviced through the size-class tiers. Anything bigger
/// is an oversize allocation routed straight to the system heap.
pub const MAX_CACHED_UNIT_SIZE: usize = 32 * 1024;

/// Upper bound on units in a single page for the smallest class; used to cap
/// thread-cache refill batches.
pub const MAX_UNITS_PER_PAGE: usize = PAGE_SIZE / ALIGNMENT;

pub use allocator::{allocate, deallocate, owns_address, shutdown};
pub use metrics::{snapshot, MetricsSnapshot};
