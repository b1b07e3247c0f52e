use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

pub fn page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        let size = info.dwPageSize as usize;
        if size == 0 {
            // Fallback for environments where GetSystemInfo fails
            4096
        } else {
            size
        }
    }
}

pub struct RawMapping {
    ptr: *mut std::ffi::c_void,
    len: usize,
}

impl RawMapping {
    /// Creates a new anonymous, zero-filled, read-write mapping.
    ///
    /// # Safety
    ///
    /// `len` must be non-zero. The caller takes ownership of the mapping via
    /// the returned handle.
    pub unsafe fn map_anon(len: usize) -> io::Result<RawMapping> {
        // MEM_COMMIT | MEM_RESERVE in one call; committed pages are zeroed.
        let ptr = unsafe { VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

        if ptr.is_null() {
            return Err(Error::last_os_error());
        }

        Ok(RawMapping { ptr, len })
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for RawMapping {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                // MEM_RELEASE requires dwSize to be 0
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

unsafe impl Send for RawMapping {}
unsafe impl Sync for RawMapping {}
