//! The two OS primitives the allocator is built on: a program break that
//! only grows, and anonymous page mappings.

use std::{io, ptr};

use libc::{c_void, intptr_t};

use crate::error::AllocError;

/// Page size assumed when the OS cannot be asked.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Backing memory for an allocator.
///
/// # Safety
///
/// Implementors must hand out memory that nothing else reads or writes:
/// `grow` returns the previous break of a region extended by exactly
/// `increment` bytes, `map` returns a fresh, page-aligned, zeroed region of
/// at least `len` bytes that stays valid until `unmap` is called with the
/// same address and length.
pub unsafe trait MemorySource {
  /// Moves the break forward by `increment` bytes and returns the old break.
  unsafe fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, AllocError>;

  /// Maps `len` bytes of private anonymous memory.
  unsafe fn map(
    &mut self,
    len: usize,
  ) -> Result<*mut u8, AllocError>;

  /// Returns a mapping obtained from [`MemorySource::map`] to the OS.
  unsafe fn unmap(
    &mut self,
    addr: *mut u8,
    len: usize,
  ) -> Result<(), AllocError>;

  fn page_size(&self) -> usize;
}

/// The process data segment and `mmap(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct System;

unsafe impl MemorySource for System {
  unsafe fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, AllocError> {
    let delta =
      intptr_t::try_from(increment).map_err(|_| AllocError::OutOfMemory { requested: increment })?;

    let address = unsafe { libc::sbrk(delta) };

    if address == usize::MAX as *mut c_void {
      return Err(AllocError::OutOfMemory { requested: increment });
    }

    Ok(address.cast())
  }

  unsafe fn map(
    &mut self,
    len: usize,
  ) -> Result<*mut u8, AllocError> {
    let address = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == libc::MAP_FAILED {
      return Err(AllocError::MapFailed {
        len,
        source: io::Error::last_os_error(),
      });
    }

    Ok(address.cast())
  }

  unsafe fn unmap(
    &mut self,
    addr: *mut u8,
    len: usize,
  ) -> Result<(), AllocError> {
    if unsafe { libc::munmap(addr.cast(), len) } == -1 {
      return Err(AllocError::UnmapFailed {
        addr: addr as usize,
        len,
        source: io::Error::last_os_error(),
      });
    }

    Ok(())
  }

  fn page_size(&self) -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
      size if size > 0 => size as usize,
      _ => DEFAULT_PAGE_SIZE,
    }
  }
}

/// Current program break, for diagnostics.
pub fn program_break() -> *mut u8 {
  unsafe { libc::sbrk(0) }.cast()
}
