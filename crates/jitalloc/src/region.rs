use std::io;
use std::ops::Range;
use std::ptr::NonNull;

#[cfg(target_family = "unix")]
use rustix::mm::{self as mman, MapFlags, MprotectFlags, ProtFlags};
#[cfg(target_family = "windows")]
use windows::Win32::System::Memory;

// TODO: query the page size instead of assuming 4 KiB
pub const PAGE_LEN: usize = 4 * bytesize::KIB as usize;
pub const REGION_MIN_LEN: usize = 256 * bytesize::KIB as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadExec,
}

/// An anonymous memory mapping. Unmapped on drop.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned by this value and may be protected or unmapped from any thread
unsafe impl Send for Region {}

impl Region {
    /// Maps an inaccessible region of at least `len` bytes.
    pub fn map(len: usize) -> io::Result<Self> {
        let len = len.max(REGION_MIN_LEN).next_multiple_of(PAGE_LEN);

        #[cfg(target_family = "unix")]
        // SAFETY: a null hint lets the kernel pick any address, so nothing can be clobbered
        let ptr = unsafe {
            mman::mmap_anonymous(std::ptr::null_mut(), len, ProtFlags::empty(), MapFlags::PRIVATE)
        }
        .map_err(io::Error::from)?;

        #[cfg(target_family = "windows")]
        // SAFETY: no base address is requested, so nothing can be clobbered
        let ptr = unsafe {
            Memory::VirtualAlloc(
                None,
                len,
                Memory::MEM_RESERVE | Memory::MEM_COMMIT,
                Memory::PAGE_NOACCESS,
            )
        };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;
        Ok(Self { ptr, len })
    }

    /// Changes the protection of the pages covering the byte range `range`.
    pub fn protect(&self, range: Range<usize>, protection: Protection) -> io::Result<()> {
        let start = range.start - range.start % PAGE_LEN;
        let end = range.end.next_multiple_of(PAGE_LEN).min(self.len);
        if start >= end {
            return Ok(());
        }

        // SAFETY: `start` is within the mapping, which is valid for `self.len` bytes
        let ptr = unsafe { self.ptr.as_ptr().add(start) };

        #[cfg(target_family = "unix")]
        {
            let flags = match protection {
                Protection::ReadWrite => MprotectFlags::READ | MprotectFlags::WRITE,
                Protection::ReadExec => MprotectFlags::READ | MprotectFlags::EXEC,
            };

            // SAFETY: the range is page aligned and contained in a mapping made by `map`
            unsafe { mman::mprotect(ptr.cast(), end - start, flags) }.map_err(io::Error::from)
        }

        #[cfg(target_family = "windows")]
        {
            let flags = match protection {
                Protection::ReadWrite => Memory::PAGE_READWRITE,
                Protection::ReadExec => Memory::PAGE_EXECUTE_READ,
            };

            let mut previous = Memory::PAGE_PROTECTION_FLAGS(0);

            // SAFETY: the range is page aligned and contained in a mapping made by `map`
            unsafe { Memory::VirtualProtect(ptr.cast(), end - start, flags, &raw mut previous) }
                .map_err(io::Error::from)
        }
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        #[cfg(target_family = "unix")]
        // SAFETY: the mapping was made by `map` and is not referenced anymore
        let result = unsafe { mman::munmap(self.ptr.as_ptr().cast(), self.len) };

        #[cfg(target_family = "windows")]
        // SAFETY: the mapping was made by `map` and is not referenced anymore
        let result = unsafe {
            Memory::VirtualFree(self.ptr.as_ptr().cast(), 0, Memory::MEM_RELEASE)
        };

        if let Err(e) = result {
            tracing::warn!("failed to unmap jit region: {e}");
        }
    }
}
