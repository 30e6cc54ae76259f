//! The arena: a chain of blocks carved out of the program break.
//!
//! ```text
//!   start                                                     end (break)
//!   ▼                                                              ▼
//!   ┌─────┬──────────┬─────┬──────────────┬─────┬──────────────────┐
//!   │ hdr │ ALLOCATED│ hdr │     FREE     │ hdr │    ALLOCATED     │
//!   └─────┴──────────┴─────┴──────────────┴─────┴──────────────────┘
//!     ◄─── next ───►   ◄─── next ───►
//!     ◄─── prev ────   ◄─── prev ────
//! ```
//!
//! Blocks tile the arena without gaps, so `prev`/`next` always point at the
//! physically adjacent headers.

use std::{marker::PhantomData, ptr};

use log::{debug, trace, warn};

use crate::{
  align::ALIGNMENT,
  block::{Block, BlockInfo, HEADER_SIZE, Status},
  config::{Coalescing, normalized_arena_size},
  error::AllocError,
  os::MemorySource,
};

/// Smallest leftover worth carving into a block of its own.
pub const MIN_SPLIT: usize = ALIGNMENT + HEADER_SIZE;

/// Totals over the arena chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_bytes: usize,
  /// Headers and payloads together.
  pub arena_bytes: usize,
}

pub struct Heap {
  start: *mut Block,
  end: *mut u8,
  preallocated: bool,
  arena_size: usize,
  coalescing: Coalescing,
}

// The chain lives in memory owned by this value alone.
unsafe impl Send for Heap {}

impl Heap {
  pub const fn new(
    arena_size: usize,
    coalescing: Coalescing,
  ) -> Self {
    Self {
      start: ptr::null_mut(),
      end: ptr::null_mut(),
      preallocated: false,
      arena_size: normalized_arena_size(arena_size),
      coalescing,
    }
  }

  pub fn is_preallocated(&self) -> bool {
    self.preallocated
  }

  /// Whether `addr` falls inside the arena.
  pub fn contains(
    &self,
    addr: *const u8,
  ) -> bool {
    let addr = addr as usize;

    self.preallocated && self.start as usize <= addr && addr < self.end as usize
  }

  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.start,
      _heap: PhantomData,
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(HeapStats::default(), |mut stats, block| {
      stats.blocks += 1;
      stats.arena_bytes += HEADER_SIZE + block.size;

      match block.status {
        Status::Free => {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
        },
        _ => stats.allocated_bytes += block.size,
      }

      stats
    })
  }

  /// Grows the break by `bytes`, failing if the new bytes do not start where
  /// the arena ends.
  unsafe fn grow<S: MemorySource>(
    &mut self,
    source: &mut S,
    bytes: usize,
  ) -> Result<(), AllocError> {
    let previous = unsafe { source.grow(bytes)? };

    if previous != self.end {
      warn!(
        "program break moved behind the heap: expected {:?}, found {:?}",
        self.end, previous
      );
      return Err(AllocError::NonContiguous {
        expected: self.end as usize,
        found: previous as usize,
      });
    }

    self.end = unsafe { previous.add(bytes) };
    debug!("arena grew by {} bytes, end = {:?}", bytes, self.end);

    Ok(())
  }

  /// Carves the initial arena as one free block. Runs once per heap.
  fn preallocate<S: MemorySource>(
    &mut self,
    source: &mut S,
  ) -> Result<(), AllocError> {
    if self.preallocated {
      return Ok(());
    }

    unsafe {
      let base = source.grow(self.arena_size)?;
      let padding = base.align_offset(ALIGNMENT);

      if padding != 0 {
        let tail = source.grow(padding)?;

        if tail != base.add(self.arena_size) {
          return Err(AllocError::NonContiguous {
            expected: base.add(self.arena_size) as usize,
            found: tail as usize,
          });
        }
      }

      let block = base.add(padding).cast::<Block>();
      block.write(Block::new(
        self.arena_size - HEADER_SIZE,
        Status::Free,
        ptr::null_mut(),
        ptr::null_mut(),
      ));

      self.start = block;
      self.end = base.add(padding + self.arena_size);
      self.preallocated = true;

      debug!("preallocated {} byte arena at {:?}", self.arena_size, block);
    }

    Ok(())
  }

  /// Smallest free block that holds `size` bytes, earliest one on ties.
  unsafe fn find_best(
    &self,
    size: usize,
  ) -> *mut Block {
    unsafe {
      let mut current = self.start;
      let mut best: *mut Block = ptr::null_mut();

      while !current.is_null() {
        let fits = (*current).status == Status::Free && (*current).size >= size;

        if fits && (best.is_null() || (*current).size < (*best).size) {
          best = current;
        }
        current = (*current).next;
      }

      best
    }
  }

  unsafe fn find_last(&self) -> *mut Block {
    unsafe {
      let mut current = self.start;

      while !current.is_null() && !(*current).next.is_null() {
        current = (*current).next;
      }

      current
    }
  }

  /// Truncates `block` to `size` bytes and links a free block owning the
  /// rest right after it.
  unsafe fn split(
    block: *mut Block,
    size: usize,
  ) {
    unsafe {
      let remainder = block.cast::<u8>().add(HEADER_SIZE + size).cast::<Block>();
      remainder.write(Block::new(
        (*block).size - size - HEADER_SIZE,
        Status::Free,
        block,
        (*block).next,
      ));

      if !(*remainder).next.is_null() {
        (*(*remainder).next).prev = remainder;
      }

      (*block).size = size;
      (*block).next = remainder;
    }
  }

  /// Merges `right` into its predecessor `left`, abandoning its header.
  unsafe fn absorb(
    left: *mut Block,
    right: *mut Block,
  ) {
    unsafe {
      (*left).size += (*right).size + HEADER_SIZE;
      (*left).next = (*right).next;

      if !(*right).next.is_null() {
        (*(*right).next).prev = left;
      }
    }
  }

  /// Serves `size` bytes (already aligned) from the arena.
  pub fn allocate<S: MemorySource>(
    &mut self,
    source: &mut S,
    size: usize,
  ) -> Result<*mut Block, AllocError> {
    self.preallocate(source)?;

    unsafe {
      let best = self.find_best(size);

      if best.is_null() {
        let last = self.find_last();

        return if (*last).status == Status::Free {
          self.extend_tail(source, last, size)
        } else {
          self.append(source, last, size)
        };
      }

      if (*best).size - size >= MIN_SPLIT {
        trace!("splitting {} byte block at {:?} for {} bytes", (*best).size, best, size);
        Self::split(best, size);
      }

      (*best).status = Status::Allocated;
      Ok(best)
    }
  }

  /// Grows the free tail by exactly what it lacks and hands it out.
  unsafe fn extend_tail<S: MemorySource>(
    &mut self,
    source: &mut S,
    last: *mut Block,
    size: usize,
  ) -> Result<*mut Block, AllocError> {
    unsafe {
      trace!("extending free tail {:?} from {} to {} bytes", last, (*last).size, size);
      self.grow(source, size - (*last).size)?;

      (*last).size = size;
      (*last).status = Status::Allocated;
    }

    Ok(last)
  }

  /// Places a new allocated block at the end of the arena.
  unsafe fn append<S: MemorySource>(
    &mut self,
    source: &mut S,
    last: *mut Block,
    size: usize,
  ) -> Result<*mut Block, AllocError> {
    let total = size.checked_add(HEADER_SIZE).ok_or(AllocError::Overflow)?;
    let block = self.end.cast::<Block>();

    unsafe {
      self.grow(source, total)?;

      block.write(Block::new(size, Status::Allocated, last, ptr::null_mut()));
      (*last).next = block;
    }

    trace!("appended {} byte block at {:?}", size, block);
    Ok(block)
  }

  /// Marks an allocated block free and merges it with its free neighbours.
  ///
  /// Returns the block that now owns the released bytes.
  ///
  /// # Safety
  ///
  /// `block` must be a header of this heap's chain.
  pub unsafe fn release(
    &mut self,
    block: *mut Block,
  ) -> Result<*mut Block, AllocError> {
    unsafe {
      match (*block).status {
        Status::Allocated => {},
        Status::Free => {
          return Err(AllocError::DoubleFree {
            addr: Block::payload(block).as_ptr() as usize,
          });
        },
        Status::Mapped => {
          return Err(AllocError::InvalidPointer {
            addr: Block::payload(block).as_ptr() as usize,
          });
        },
      }

      (*block).status = Status::Free;

      let next = (*block).next;
      let merge_forward = self.coalescing == Coalescing::Bidirectional && !next.is_null();

      if merge_forward && (*next).status == Status::Free {
        trace!("merging {:?} with following free block {:?}", block, next);
        Self::absorb(block, next);
      }

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).status == Status::Free {
        trace!("merging {:?} into preceding free block {:?}", block, prev);
        Self::absorb(prev, block);
        return Ok(prev);
      }

      Ok(block)
    }
  }

  /// Tries to make the allocated `block` hold `size` bytes without moving it.
  ///
  /// Returns `Ok(false)` when the block cannot reach `size` where it stands.
  ///
  /// # Safety
  ///
  /// `block` must be an allocated header of this heap's chain and `size`
  /// must be aligned.
  pub unsafe fn resize_in_place<S: MemorySource>(
    &mut self,
    source: &mut S,
    block: *mut Block,
    size: usize,
  ) -> Result<bool, AllocError> {
    unsafe {
      let current = (*block).size;

      if size <= current {
        Self::trim(block, size);
        return Ok(true);
      }

      let next = (*block).next;
      let next_free = !next.is_null() && (*next).status == Status::Free;
      let available = if next_free { current + HEADER_SIZE + (*next).size } else { current };

      if available >= size {
        Self::absorb(block, next);
        Self::trim(block, size);
        return Ok(true);
      }

      let at_tail = next.is_null() || (next_free && (*next).next.is_null());
      if !at_tail {
        return Ok(false);
      }

      self.grow(source, size - available)?;

      if next_free {
        Self::absorb(block, next);
      }
      (*block).size = size;

      Ok(true)
    }
  }

  /// Cuts `block` down to `size`, returning the excess to a free successor.
  unsafe fn trim(
    block: *mut Block,
    size: usize,
  ) {
    unsafe {
      if (*block).size - size < MIN_SPLIT {
        return;
      }

      Self::split(block, size);

      let remainder = (*block).next;
      let after = (*remainder).next;
      if !after.is_null() && (*after).status == Status::Free {
        Self::absorb(remainder, after);
      }
    }
  }
}

/// Walks the chain in address order.
pub struct Blocks<'a> {
  current: *const Block,
  _heap: PhantomData<&'a Heap>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let block = unsafe { &*self.current };
    let info = BlockInfo {
      addr: self.current as usize,
      size: block.size,
      status: block.status,
    };
    self.current = block.next;

    Some(info)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::MIN_ARENA_SIZE, toy::ToyMemory};

  const ARENA: usize = 4096;

  fn heap(coalescing: Coalescing) -> (Heap, ToyMemory) {
    (Heap::new(ARENA, coalescing), ToyMemory::new(64 * 1024))
  }

  fn layout(heap: &Heap) -> Vec<(usize, Status)> {
    heap.blocks().map(|block| (block.size, block.status)).collect()
  }

  #[test_log::test]
  fn test_preallocate_once() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    assert!(!heap.is_preallocated());
    assert_eq!(heap.blocks().count(), 0);

    heap.preallocate(&mut toy).unwrap();
    heap.preallocate(&mut toy).unwrap();

    assert!(heap.is_preallocated());
    assert_eq!(toy.counters().grows, 1);
    assert_eq!(layout(&heap), vec![(ARENA - HEADER_SIZE, Status::Free)]);
    assert_eq!(heap.stats().arena_bytes, ARENA);
  }

  #[test_log::test]
  fn test_unaligned_break_is_padded() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);
    toy.advance_break(4);

    let block = heap.allocate(&mut toy, 64).unwrap();

    assert_eq!(toy.counters().grows, 2);
    assert_eq!(block as usize, toy.base() as usize + ALIGNMENT);
    assert_eq!(unsafe { Block::payload(block) }.as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(heap.stats().arena_bytes, ARENA);

    let last = heap.blocks().last().unwrap();
    assert_eq!(last.addr + HEADER_SIZE + last.size, toy.program_break() as usize);

    // Growth after the padded start stays contiguous.
    heap.allocate(&mut toy, ARENA).unwrap();
    assert_eq!(heap.blocks().last().unwrap().addr % ALIGNMENT, 0);
  }

  #[test_log::test]
  fn test_break_moved_while_padding() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);
    toy.advance_break(4);
    toy.advance_break_after_grow(1, 8);

    assert!(matches!(heap.allocate(&mut toy, 64), Err(AllocError::NonContiguous { .. })));
    assert!(!heap.is_preallocated());
    assert_eq!(heap.blocks().count(), 0);
  }

  #[test_log::test]
  fn test_unnormalized_arena_size() {
    let mut toy = ToyMemory::new(64 * 1024);

    // Too small to hold a block at all.
    let mut tiny = Heap::new(16, Coalescing::Backward);
    tiny.allocate(&mut toy, 8).unwrap();
    assert_eq!(tiny.stats().arena_bytes, MIN_ARENA_SIZE);

    // Not a multiple of the alignment.
    let mut odd = Heap::new(1001, Coalescing::Backward);
    odd.allocate(&mut toy, 960).unwrap();
    odd.allocate(&mut toy, 8).unwrap();

    assert_eq!(odd.stats().arena_bytes, 1008 + 8 + HEADER_SIZE);
    assert!(
      odd
        .blocks()
        .all(|block| block.addr % ALIGNMENT == 0 && block.size % ALIGNMENT == 0)
    );
  }

  #[test_log::test]
  fn test_preallocate_failure_leaves_heap_untouched() {
    let mut heap = Heap::new(ARENA, Coalescing::Backward);
    let mut toy = ToyMemory::new(ARENA / 2);

    assert!(matches!(heap.allocate(&mut toy, 64), Err(AllocError::OutOfMemory { .. })));
    assert!(!heap.is_preallocated());
    assert_eq!(toy.used(), 0);
  }

  #[test_log::test]
  fn test_split_and_best_fit() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    let a = heap.allocate(&mut toy, 104).unwrap();
    let b = heap.allocate(&mut toy, 200).unwrap();
    let c = heap.allocate(&mut toy, 48).unwrap();

    assert_eq!(b as usize, a as usize + HEADER_SIZE + 104);
    assert_eq!(c as usize, b as usize + HEADER_SIZE + 200);

    unsafe {
      heap.release(a).unwrap();
      assert_eq!(heap.release(b).unwrap(), a);
    }

    // `b` merged back into `a`, so the 336 byte hole is the best fit.
    assert_eq!(heap.stats().blocks, 3);
    let d = heap.allocate(&mut toy, 64).unwrap();
    assert_eq!(d, a);
  }

  #[test_log::test]
  fn test_small_leftover_is_not_split() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    let a = heap.allocate(&mut toy, 104).unwrap();
    heap.allocate(&mut toy, 8).unwrap();
    unsafe { heap.release(a).unwrap() };

    let b = heap.allocate(&mut toy, 72).unwrap();

    assert_eq!(a, b);
    assert_eq!(heap.blocks().next().map(|block| block.size), Some(104));
  }

  #[test_log::test]
  fn test_extend_free_tail() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    heap.allocate(&mut toy, 1000).unwrap();
    let tail = heap.allocate(&mut toy, 5000).unwrap();

    let free_tail = ARENA - 2 * HEADER_SIZE - 1000;
    assert_eq!(toy.used(), ARENA + (5000 - free_tail));
    assert_eq!(layout(&heap), vec![(1000, Status::Allocated), (5000, Status::Allocated)]);
    assert_eq!(unsafe { Block::end(tail) }, toy.program_break());
  }

  #[test_log::test]
  fn test_append_after_allocated_tail() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    heap.allocate(&mut toy, ARENA - HEADER_SIZE).unwrap();
    let used = toy.used();
    let block = heap.allocate(&mut toy, 64).unwrap();

    assert_eq!(block.cast::<u8>(), unsafe { toy.base().add(used) });
    assert_eq!(toy.used(), used + 64 + HEADER_SIZE);
    assert_eq!(heap.stats().blocks, 2);
  }

  #[test_log::test]
  fn test_foreign_break_blocks_growth() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    heap.allocate(&mut toy, ARENA - HEADER_SIZE).unwrap();
    toy.advance_break(16);
    let before = layout(&heap);

    assert!(matches!(heap.allocate(&mut toy, 64), Err(AllocError::NonContiguous { .. })));
    assert_eq!(layout(&heap), before);
  }

  #[test_log::test]
  fn test_backward_coalescing_only() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    let a = heap.allocate(&mut toy, 64).unwrap();
    let b = heap.allocate(&mut toy, 64).unwrap();
    heap.allocate(&mut toy, 64).unwrap();

    unsafe {
      heap.release(b).unwrap();
      assert_eq!(heap.release(a).unwrap(), a);
    }

    assert_eq!(heap.stats().free_blocks, 3);
    assert_eq!(layout(&heap)[..2], [(64, Status::Free), (64, Status::Free)]);
  }

  #[test_log::test]
  fn test_bidirectional_coalescing() {
    let (mut heap, mut toy) = heap(Coalescing::Bidirectional);

    let a = heap.allocate(&mut toy, 64).unwrap();
    let b = heap.allocate(&mut toy, 64).unwrap();
    heap.allocate(&mut toy, 64).unwrap();

    unsafe {
      heap.release(b).unwrap();
      heap.release(a).unwrap();
    }

    assert_eq!(layout(&heap)[0], (64 + HEADER_SIZE + 64, Status::Free));
    assert_eq!(heap.stats().free_blocks, 2);
  }

  #[test_log::test]
  fn test_double_free_is_rejected() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    let a = heap.allocate(&mut toy, 64).unwrap();
    heap.allocate(&mut toy, 64).unwrap();

    unsafe {
      heap.release(a).unwrap();
      assert!(matches!(heap.release(a), Err(AllocError::DoubleFree { .. })));
    }
  }

  #[test_log::test]
  fn test_resize_in_place() {
    let (mut heap, mut toy) = heap(Coalescing::Backward);

    let a = heap.allocate(&mut toy, 256).unwrap();
    let b = heap.allocate(&mut toy, 64).unwrap();

    unsafe {
      // Shrinking leaves a free remainder behind `a`.
      assert!(heap.resize_in_place(&mut toy, a, 128).unwrap());
      assert_eq!(layout(&heap)[..3], [
        (128, Status::Allocated),
        (128 - HEADER_SIZE, Status::Free),
        (64, Status::Allocated)
      ]);

      // Growing takes the remainder back and splits off what is left.
      assert!(heap.resize_in_place(&mut toy, a, 200).unwrap());
      assert_eq!(layout(&heap)[..2], [(200, Status::Allocated), (24, Status::Free)]);

      // `a` is boxed in by `b`.
      assert!(!heap.resize_in_place(&mut toy, a, 512).unwrap());

      // `b` is followed only by the free tail and can grow past the arena.
      let grows = toy.counters().grows;
      assert!(heap.resize_in_place(&mut toy, b, ARENA).unwrap());
      assert_eq!(toy.counters().grows, grows + 1);
      assert_eq!(Block::end(b), toy.program_break());
      assert_eq!(heap.stats().blocks, 3);
    }
  }
}
