//! Executable memory arena for JITs.
mod region;

use std::ptr::NonNull;

use easyerr::Error;
#[cfg(target_family = "windows")]
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache, Threading::GetCurrentProcess,
};

#[cfg(target_os = "macos")]
unsafe extern "C" {
    unsafe fn sys_icache_invalidate(start: *mut std::ffi::c_void, len: usize);
}

use crate::region::Region;

#[rustfmt::skip]
pub use crate::region::{PAGE_LEN, Protection};

/// Alignment of every piece of code in the arena.
pub const CODE_ALIGN: usize = 16;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("empty code buffer")]
    Empty,
    #[error(transparent)]
    Os { source: std::io::Error },
}

impl From<std::io::Error> for AllocError {
    fn from(source: std::io::Error) -> Self {
        Self::Os { source }
    }
}

/// A piece of executable code inside an [`Arena`].
#[derive(Debug, Clone, Copy)]
pub struct Code {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the code is immutable once inserted, so the handle may move between threads
unsafe impl Send for Code {}

impl Code {
    /// Address of the first instruction. Calling into it is only sound while the arena it came
    /// from is alive and has not been cleared.
    #[inline(always)]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }
}

/// A bump arena of executable code. Code is only freed when the whole arena is cleared or
/// dropped.
#[derive(Default)]
pub struct Arena {
    regions: Vec<Region>,
    /// Offset of the first free byte in the last region.
    offset: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes of code currently stored.
    pub fn used(&self) -> usize {
        let full: usize = self
            .regions
            .iter()
            .rev()
            .skip(1)
            .map(Region::len)
            .sum();

        full + self.offset
    }

    /// Copies `code` into the arena and makes it executable.
    pub fn insert(&mut self, code: &[u8]) -> Result<Code, AllocError> {
        if code.is_empty() {
            return Err(AllocError::Empty);
        }

        let start = self.offset.next_multiple_of(CODE_ALIGN);
        let fits = self
            .regions
            .last()
            .is_some_and(|r| r.len() >= start + code.len());

        let start = if fits {
            start
        } else {
            self.regions.push(Region::map(code.len())?);
            0
        };

        let end = start + code.len();
        let region = &self.regions[self.regions.len() - 1];

        region.protect(start..end, Protection::ReadWrite)?;

        // SAFETY: the range was just made writable and lies inside the region. it does not
        // overlap `code`, which lives outside of the arena
        let ptr = unsafe {
            let dst = region.as_ptr().add(start);
            std::ptr::copy_nonoverlapping(code.as_ptr(), dst.as_ptr(), code.len());
            dst
        };

        region.protect(start..end, Protection::ReadExec)?;
        flush_icache(ptr, code.len());

        self.offset = end;
        Ok(Code {
            ptr,
            len: code.len(),
        })
    }

    /// Unmaps all code.
    ///
    /// # Safety
    /// No [`Code`] obtained from this arena may be executed afterwards.
    pub unsafe fn clear(&mut self) {
        self.regions.clear();
        self.offset = 0;
    }
}

#[allow(unused_variables)]
fn flush_icache(ptr: NonNull<u8>, len: usize) {
    #[cfg(target_family = "windows")]
    // SAFETY: the range is part of this process' memory
    unsafe {
        let process = GetCurrentProcess();
        if let Err(e) = FlushInstructionCache(process, Some(ptr.as_ptr().cast()), len) {
            tracing::warn!("failed to flush instruction cache: {e}");
        }
    }

    #[cfg(target_os = "macos")]
    // SAFETY: the range is part of this process' memory
    unsafe {
        sys_icache_invalidate(ptr.as_ptr().cast(), len);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_and_read_back() {
        let mut arena = Arena::new();
        let a = arena.insert(&[1, 2, 3]).unwrap();
        let b = arena.insert(&[4, 5]).unwrap();

        assert_eq!(b.as_ptr().as_ptr() as usize % CODE_ALIGN, 0);
        assert_eq!(b.as_ptr().as_ptr() as usize - a.as_ptr().as_ptr() as usize, CODE_ALIGN);

        // SAFETY: both pieces are readable and the arena is alive
        unsafe {
            assert_eq!(std::slice::from_raw_parts(a.as_ptr().as_ptr(), a.len()), &[1, 2, 3]);
            assert_eq!(std::slice::from_raw_parts(b.as_ptr().as_ptr(), b.len()), &[4, 5]);
        }
    }

    #[test]
    fn oversized_code_gets_own_region() {
        let mut arena = Arena::new();
        arena.insert(&[0xCC; 64]).unwrap();

        let big = vec![0x90; region::REGION_MIN_LEN + 1];
        let code = arena.insert(&big).unwrap();
        assert_eq!(code.len(), big.len());
        assert_eq!(arena.regions.len(), 2);
        assert_eq!(arena.used(), region::REGION_MIN_LEN.next_multiple_of(PAGE_LEN) + big.len());
    }

    #[test]
    fn empty_code_is_rejected() {
        let mut arena = Arena::new();
        assert!(matches!(arena.insert(&[]), Err(AllocError::Empty)));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn executes() {
        // mov eax, 42; ret
        let mut arena = Arena::new();
        let code = arena.insert(&[0xB8, 42, 0, 0, 0, 0xC3]).unwrap();

        // SAFETY: the code is a complete function following the C calling convention
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(code.as_ptr().as_ptr()) };
        assert_eq!(f(), 42);
    }
}
