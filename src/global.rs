//! One allocator per process over the real program break, behind a single
//! lock. The arena is created by the first allocation.

use parking_lot::{Mutex, const_mutex};

use crate::{
  allocator::{OsAllocator, Stats},
  config::Config,
  os::System,
};

static ALLOCATOR: Mutex<OsAllocator<System>> =
  const_mutex(OsAllocator::new(System, Config::DEFAULT));

pub fn malloc(size: usize) -> *mut u8 {
  ALLOCATOR.lock().allocate(size)
}

pub fn calloc(
  count: usize,
  element_size: usize,
) -> *mut u8 {
  ALLOCATOR.lock().zero_allocate(count, element_size)
}

/// # Safety
///
/// See [`OsAllocator::resize`].
pub unsafe fn realloc(
  ptr: *mut u8,
  new_size: usize,
) -> *mut u8 {
  unsafe { ALLOCATOR.lock().resize(ptr, new_size) }
}

/// # Safety
///
/// See [`OsAllocator::release`].
pub unsafe fn free(ptr: *mut u8) {
  unsafe { ALLOCATOR.lock().release(ptr) }
}

/// # Safety
///
/// See [`OsAllocator::usable_size`].
pub unsafe fn usable_size(ptr: *mut u8) -> usize {
  unsafe { ALLOCATOR.lock().usable_size(ptr) }
}

pub fn stats() -> Stats {
  ALLOCATOR.lock().stats()
}
