use std::{
  process,
  ptr::{self, NonNull},
};

use log::{debug, error, trace, warn};

use crate::{
  align::{ALIGNMENT, checked_align},
  block::{Block, HEADER_SIZE, Status},
  config::Config,
  error::AllocError,
  heap::{Blocks, Heap, HeapStats},
  mapped,
  os::MemorySource,
};

/// Arena totals plus the live mapped blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
  pub heap: HeapStats,
  pub mapped_blocks: usize,
  /// Headers and payloads of the live mapped blocks.
  pub mapped_bytes: usize,
}

/// The allocate / zero-allocate / resize / release family over one arena.
///
/// Small requests are carved out of the arena, requests whose header plus
/// payload reach the threshold get a mapping of their own:
///
/// ```text
///   allocate(size)
///        │
///        ├── align(size) + HEADER_SIZE <  threshold ──► Heap (best fit, split, grow)
///        │
///        └── align(size) + HEADER_SIZE >= threshold ──► mmap, status = Mapped
/// ```
///
/// Failures surface as a null pointer. The `try_` variants report why.
pub struct OsAllocator<S: MemorySource> {
  source: S,
  heap: Heap,
  config: Config,
  mapped_blocks: usize,
  mapped_bytes: usize,
}

impl<S: MemorySource> OsAllocator<S> {
  pub const fn new(
    source: S,
    config: Config,
  ) -> Self {
    Self {
      source,
      heap: Heap::new(config.arena_size, config.coalescing),
      config,
      mapped_blocks: 0,
      mapped_bytes: 0,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn source_mut(&mut self) -> &mut S {
    &mut self.source
  }

  /// Arena blocks in address order. Mapped blocks are not part of it.
  pub fn blocks(&self) -> Blocks<'_> {
    self.heap.blocks()
  }

  pub fn stats(&self) -> Stats {
    Stats {
      heap: self.heap.stats(),
      mapped_blocks: self.mapped_blocks,
      mapped_bytes: self.mapped_bytes,
    }
  }

  /// Allocates `size` bytes, returning null on failure or when `size` is 0.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    sentinel(self.try_allocate(size))
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.route(size, self.config.mmap_threshold)
  }

  /// Allocates `count * element_size` zeroed bytes.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    element_size: usize,
  ) -> *mut u8 {
    sentinel(self.try_zero_allocate(count, element_size))
  }

  pub fn try_zero_allocate(
    &mut self,
    count: usize,
    element_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if count == 0 || element_size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let size = count.checked_mul(element_size).ok_or(AllocError::Overflow)?;
    let threshold = self.config.zero_fill_threshold.unwrap_or_else(|| self.source.page_size());

    let payload = self.route(size, threshold)?;

    unsafe {
      let block = Block::from_payload(payload.as_ptr());
      ptr::write_bytes(payload.as_ptr(), 0, (*block).size);
    }

    Ok(payload)
  }

  fn route(
    &mut self,
    size: usize,
    threshold: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let aligned = checked_align(size).ok_or(AllocError::Overflow)?;
    let total = aligned.checked_add(HEADER_SIZE).ok_or(AllocError::Overflow)?;

    let block = if total < threshold {
      trace!("{} bytes from the arena", aligned);
      self.heap.allocate(&mut self.source, aligned)?
    } else {
      trace!("{} bytes from a dedicated mapping", aligned);
      let block = mapped::map_block(&mut self.source, aligned)?;
      self.mapped_blocks += 1;
      self.mapped_bytes += total;
      block
    };

    Ok(unsafe { Block::payload(block) })
  }

  /// Releases a pointer returned by this allocator. Null is ignored.
  ///
  /// Pointers that were not handed out, or were already released, are
  /// logged and ignored. Failing to unmap a mapped block aborts the process.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or come from this allocator, and must not be used
  /// after this call.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    match unsafe { self.try_release(ptr) } {
      Ok(()) => {},
      Err(err @ AllocError::UnmapFailed { .. }) => fatal(&err),
      Err(err) => warn!("ignoring release of {:?}: {}", ptr, err),
    }
  }

  unsafe fn try_release(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), AllocError> {
    if ptr.is_null() {
      return Ok(());
    }

    let block = unsafe { self.header(ptr)? };

    if unsafe { (*block).status } == Status::Mapped {
      let total = unsafe { mapped::unmap_block(&mut self.source, block)? };
      self.mapped_blocks = self.mapped_blocks.saturating_sub(1);
      self.mapped_bytes = self.mapped_bytes.saturating_sub(total);
    } else {
      unsafe { self.heap.release(block)? };
    }

    Ok(())
  }

  /// Changes the size of an allocation, moving it only when it cannot be
  /// resized where it stands.
  ///
  /// A null `ptr` allocates. A `new_size` of 0 releases `ptr` and returns
  /// null. When moving fails, null is returned and `ptr` stays valid.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or come from this allocator. If a different pointer
  /// is returned, `ptr` must not be used anymore.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    sentinel(unsafe { self.try_resize(ptr, new_size) })
  }

  unsafe fn try_resize(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let Some(payload) = NonNull::new(ptr) else {
      return self.try_allocate(new_size);
    };

    if new_size == 0 {
      unsafe { self.release(ptr) };
      return Err(AllocError::ZeroSize);
    }

    let aligned = checked_align(new_size).ok_or(AllocError::Overflow)?;
    let total = aligned.checked_add(HEADER_SIZE).ok_or(AllocError::Overflow)?;

    let block = unsafe { self.header(ptr)? };
    let (status, current) = unsafe { ((*block).status, (*block).size) };

    match status {
      Status::Free => return Err(AllocError::InvalidPointer { addr: ptr as usize }),
      Status::Mapped if aligned <= current => return Ok(payload),
      Status::Allocated if total < self.config.mmap_threshold => {
        match unsafe { self.heap.resize_in_place(&mut self.source, block, aligned) } {
          Ok(true) => return Ok(payload),
          Ok(false) => {},
          Err(err) => debug!("cannot resize {:?} in place: {}", ptr, err),
        }
      },
      _ => {},
    }

    let moved = self.try_allocate(new_size)?;

    unsafe {
      ptr::copy_nonoverlapping(ptr, moved.as_ptr(), current.min(aligned));
      self.release(ptr);
    }

    trace!("moved {:?} to {:?}", ptr, moved);
    Ok(moved)
  }

  /// Usable bytes behind `ptr`, or 0 for null and unknown pointers.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or come from this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    if ptr.is_null() {
      return 0;
    }

    match unsafe { self.header(ptr) } {
      Ok(block) if unsafe { (*block).status } != Status::Free => unsafe { (*block).size },
      _ => 0,
    }
  }

  /// Recovers the header of a caller pointer after checking it points where
  /// one of our payloads could start.
  unsafe fn header(
    &self,
    ptr: *mut u8,
  ) -> Result<*mut Block, AllocError> {
    let invalid = || AllocError::InvalidPointer { addr: ptr as usize };

    if ptr as usize % ALIGNMENT != 0 || (ptr as usize) < HEADER_SIZE {
      return Err(invalid());
    }

    let block = unsafe { Block::from_payload(ptr) };

    let valid = if self.heap.contains(ptr) {
      self.heap.contains(block.cast::<u8>())
        && matches!(
          unsafe { Block::raw_status(block) },
          Some(Status::Free | Status::Allocated)
        )
    } else {
      (unsafe { Block::raw_status(block) }) == Some(Status::Mapped)
    };

    if !valid {
      return Err(invalid());
    }

    Ok(block)
  }
}

fn sentinel(result: Result<NonNull<u8>, AllocError>) -> *mut u8 {
  match result {
    Ok(payload) => payload.as_ptr(),
    Err(err @ (AllocError::ZeroSize | AllocError::Overflow)) => {
      debug!("request rejected: {}", err);
      ptr::null_mut()
    },
    Err(err) => {
      warn!("allocation failed: {}", err);
      ptr::null_mut()
    },
  }
}

/// The address space no longer matches our bookkeeping.
fn fatal(err: &AllocError) -> ! {
  error!("{}", err);
  eprintln!("rheap: fatal: {err}");
  process::abort()
}
