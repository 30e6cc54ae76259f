//! Large requests bypass the arena: each one gets a private mapping with a
//! single header at its head and is unmapped as a whole.

use std::ptr;

use log::debug;

use crate::{
  block::{Block, HEADER_SIZE, Status},
  error::AllocError,
  os::MemorySource,
};

/// Maps a standalone block with `size` usable bytes.
pub fn map_block<S: MemorySource>(
  source: &mut S,
  size: usize,
) -> Result<*mut Block, AllocError> {
  let total = size.checked_add(HEADER_SIZE).ok_or(AllocError::Overflow)?;

  let block = unsafe { source.map(total)? }.cast::<Block>();
  unsafe { block.write(Block::new(size, Status::Mapped, ptr::null_mut(), ptr::null_mut())) };

  debug!("mapped {} bytes at {:?}", total, block);
  Ok(block)
}

/// Returns the whole span of a mapped block to the OS.
///
/// # Safety
///
/// `block` must come from [`map_block`] with the same source and must not be
/// used afterwards.
pub unsafe fn unmap_block<S: MemorySource>(
  source: &mut S,
  block: *mut Block,
) -> Result<usize, AllocError> {
  let total = unsafe { (*block).size } + HEADER_SIZE;

  unsafe { source.unmap(block.cast(), total)? };

  debug!("unmapped {} bytes at {:?}", total, block);
  Ok(total)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::toy::ToyMemory;

  #[test]
  fn test_map_then_unmap() {
    let mut toy = ToyMemory::new(4096);

    let block = map_block(&mut toy, 200_000).unwrap();

    unsafe {
      assert_eq!((*block).size, 200_000);
      assert_eq!((*block).status, Status::Mapped);
      assert!((*block).prev.is_null() && (*block).next.is_null());

      assert_eq!(unmap_block(&mut toy, block).unwrap(), 200_000 + HEADER_SIZE);
    }

    assert_eq!(toy.counters().maps, 1);
    assert_eq!(toy.counters().unmaps, 1);
    assert_eq!(toy.used(), 0);
  }

  #[test]
  fn test_map_failure() {
    let mut toy = ToyMemory::new(4096);
    toy.refuse_maps(true);

    assert!(matches!(map_block(&mut toy, 4096), Err(AllocError::MapFailed { .. })));
  }

  #[test]
  fn test_map_overflow() {
    let mut toy = ToyMemory::new(4096);

    assert!(matches!(map_block(&mut toy, usize::MAX - 1), Err(AllocError::Overflow)));
    assert_eq!(toy.counters().maps, 0);
  }
}
