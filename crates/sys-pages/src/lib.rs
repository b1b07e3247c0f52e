//! Anonymous virtual-memory page mapping.
//!
//! This is the operating-system seam of the allocator: the page cache obtains
//! large runs of zero-filled pages here and holds on to the returned
//! [`PageRun`] handles until shutdown. No file backing, no protection changes,
//! no remapping — just anonymous map and unmap.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// A handle to one anonymous memory mapping.
///
/// The mapping is unmapped when the handle is dropped. The memory is
/// zero-filled by the operating system on both supported platforms.
pub struct PageRun {
    inner: os::RawMapping,
}

impl PageRun {
    /// Base address of the mapping.
    #[must_use]
    pub fn base(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the mapping has zero length. Never true for a mapping
    /// returned by [`map_anon`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Whether `addr` falls inside this mapping.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base() as usize;
        addr >= base && addr < base + self.len()
    }
}

// The handle owns the mapping outright; nothing in it is tied to a thread.
unsafe impl Send for PageRun {}
unsafe impl Sync for PageRun {}

/// Maps `len` bytes of anonymous, zero-filled, read-write memory.
///
/// The returned base address is page-aligned. `len` need not be a page
/// multiple; the kernel rounds up, but the handle remembers the requested
/// length and unmaps with it.
///
/// # Errors
///
/// Returns the OS error if the mapping cannot be established (address space
/// exhaustion, commit limit, or a zero `len`).
pub fn map_anon(len: usize) -> io::Result<PageRun> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "length must be greater than 0",
        ));
    }
    // SAFETY: a fresh anonymous mapping aliases nothing; the handle owns it.
    let inner = unsafe { os::RawMapping::map_anon(len)? };
    Ok(PageRun { inner })
}
