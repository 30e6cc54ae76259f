//! An in-process [`MemorySource`] that fakes the program break with one
//! fixed buffer and fakes page mappings with aligned heap allocations.
//!
//! Every call is counted, which makes the allocator's use of the OS
//! observable without touching the real data segment.

use std::{
  alloc::{self, Layout},
  io,
  ptr::NonNull,
};

use crate::{error::AllocError, os::MemorySource};

const TOY_PAGE_SIZE: usize = 4096;

/// How many times each primitive succeeded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
  pub grows: usize,
  pub maps: usize,
  pub unmaps: usize,
}

pub struct ToyMemory {
  region: NonNull<u8>,
  capacity: usize,
  brk: usize,
  mappings: Vec<(NonNull<u8>, Layout)>,
  refuse_maps: bool,
  pending_shift: Option<(usize, usize)>,
  counters: Counters,
}

impl ToyMemory {
  /// Creates a toy data segment that can grow up to `capacity` bytes.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero or does not fit a page-aligned layout.
  pub fn new(capacity: usize) -> Self {
    let layout = Self::region_layout(capacity);
    let region = unsafe { alloc::alloc_zeroed(layout) };

    let Some(region) = NonNull::new(region) else {
      alloc::handle_alloc_error(layout);
    };

    Self {
      region,
      capacity,
      brk: 0,
      mappings: Vec::new(),
      refuse_maps: false,
      pending_shift: None,
      counters: Counters::default(),
    }
  }

  fn region_layout(capacity: usize) -> Layout {
    assert!(capacity > 0, "toy region needs a capacity");
    Layout::from_size_align(capacity, TOY_PAGE_SIZE)
      .expect("toy region capacity overflows a layout")
  }

  /// Start of the fake data segment.
  pub fn base(&self) -> *mut u8 {
    self.region.as_ptr()
  }

  /// Current fake program break.
  pub fn program_break(&self) -> *mut u8 {
    unsafe { self.region.as_ptr().add(self.brk) }
  }

  /// Bytes between the start of the segment and the break.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn counters(&self) -> Counters {
    self.counters
  }

  /// Mappings handed out and not yet unmapped.
  pub fn live_mappings(&self) -> usize {
    self.mappings.len()
  }

  /// Makes every following `map` call fail until reset.
  pub fn refuse_maps(
    &mut self,
    refuse: bool,
  ) {
    self.refuse_maps = refuse;
  }

  /// Moves the break the way an unrelated `sbrk` caller would.
  pub fn advance_break(
    &mut self,
    bytes: usize,
  ) {
    self.brk = (self.brk + bytes).min(self.capacity);
  }

  /// Moves the break by `bytes` right after the `grows`-th successful grow,
  /// as if another `sbrk` caller ran in between.
  pub fn advance_break_after_grow(
    &mut self,
    grows: usize,
    bytes: usize,
  ) {
    self.pending_shift = Some((grows, bytes));
  }
}

unsafe impl MemorySource for ToyMemory {
  unsafe fn grow(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, AllocError> {
    if increment > self.capacity - self.brk {
      return Err(AllocError::OutOfMemory { requested: increment });
    }

    let previous = self.program_break();
    self.brk += increment;
    self.counters.grows += 1;

    if let Some((grows, bytes)) = self.pending_shift
      && grows == self.counters.grows
    {
      self.pending_shift = None;
      self.advance_break(bytes);
    }

    Ok(previous)
  }

  unsafe fn map(
    &mut self,
    len: usize,
  ) -> Result<*mut u8, AllocError> {
    if self.refuse_maps || len == 0 {
      return Err(AllocError::MapFailed {
        len,
        source: io::Error::from(io::ErrorKind::OutOfMemory),
      });
    }

    let layout = Layout::from_size_align(len, TOY_PAGE_SIZE).map_err(|_| AllocError::Overflow)?;
    let address =
      NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(|| AllocError::MapFailed {
        len,
        source: io::Error::from(io::ErrorKind::OutOfMemory),
      })?;

    self.mappings.push((address, layout));
    self.counters.maps += 1;

    Ok(address.as_ptr())
  }

  unsafe fn unmap(
    &mut self,
    addr: *mut u8,
    len: usize,
  ) -> Result<(), AllocError> {
    let position = self
      .mappings
      .iter()
      .position(|(address, layout)| address.as_ptr() == addr && layout.size() == len)
      .ok_or_else(|| AllocError::UnmapFailed {
        addr: addr as usize,
        len,
        source: io::Error::from(io::ErrorKind::InvalidInput),
      })?;

    let (address, layout) = self.mappings.swap_remove(position);
    unsafe { alloc::dealloc(address.as_ptr(), layout) };
    self.counters.unmaps += 1;

    Ok(())
  }

  fn page_size(&self) -> usize {
    TOY_PAGE_SIZE
  }
}

impl Drop for ToyMemory {
  fn drop(&mut self) {
    unsafe {
      for (address, layout) in self.mappings.drain(..) {
        alloc::dealloc(address.as_ptr(), layout);
      }

      alloc::dealloc(self.region.as_ptr(), Self::region_layout(self.capacity));
    }
  }
}
