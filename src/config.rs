use crate::{
  align::{ALIGNMENT, checked_align},
  block::HEADER_SIZE,
};

/// Bytes preallocated for the arena on first use.
pub const DEFAULT_ARENA_SIZE: usize = 128 * 1024;

/// Requests whose header plus payload reach this size get their own mapping.
pub const DEFAULT_MMAP_THRESHOLD: usize = 128 * 1024;

/// Smallest arena that still holds one block.
pub const MIN_ARENA_SIZE: usize = HEADER_SIZE + ALIGNMENT;

/// Rounds an arena size up to the alignment and to [`MIN_ARENA_SIZE`].
pub const fn normalized_arena_size(arena_size: usize) -> usize {
  match checked_align(arena_size) {
    Some(size) if size >= MIN_ARENA_SIZE => size,
    Some(_) => MIN_ARENA_SIZE,
    None => usize::MAX & !(ALIGNMENT - 1),
  }
}

/// Which neighbours a released block merges with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Coalescing {
  /// Only the preceding block is absorbed into. A free successor stays
  /// separate until it is itself released after its predecessor.
  #[default]
  Backward,
  /// The following block is absorbed first, then the result merges into a
  /// free predecessor.
  Bidirectional,
}

/// Tunables of an [`OsAllocator`](crate::OsAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Normalized with [`normalized_arena_size`] when the heap is built.
  pub arena_size: usize,
  pub mmap_threshold: usize,
  /// Threshold used by zero-filled allocations. `None` means the page size
  /// of the memory source.
  pub zero_fill_threshold: Option<usize>,
  pub coalescing: Coalescing,
}

impl Config {
  pub const DEFAULT: Self = Self {
    arena_size: DEFAULT_ARENA_SIZE,
    mmap_threshold: DEFAULT_MMAP_THRESHOLD,
    zero_fill_threshold: None,
    coalescing: Coalescing::Backward,
  };

  /// Sets the preallocated arena size, rounded up to the alignment and to
  /// [`MIN_ARENA_SIZE`].
  pub const fn with_arena_size(
    mut self,
    arena_size: usize,
  ) -> Self {
    self.arena_size = normalized_arena_size(arena_size);
    self
  }

  pub const fn with_mmap_threshold(
    mut self,
    threshold: usize,
  ) -> Self {
    self.mmap_threshold = threshold;
    self
  }

  pub const fn with_zero_fill_threshold(
    mut self,
    threshold: usize,
  ) -> Self {
    self.zero_fill_threshold = Some(threshold);
    self
  }

  pub const fn with_coalescing(
    mut self,
    coalescing: Coalescing,
  ) -> Self {
    self.coalescing = coalescing;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::DEFAULT
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_size_is_normalized() {
    assert_eq!(Config::DEFAULT.with_arena_size(1000).arena_size, 1000);
    assert_eq!(Config::DEFAULT.with_arena_size(1001).arena_size, 1008);
    assert_eq!(Config::DEFAULT.with_arena_size(0).arena_size, MIN_ARENA_SIZE);
    assert_eq!(Config::DEFAULT.with_arena_size(usize::MAX).arena_size % ALIGNMENT, 0);
  }

  #[test]
  fn test_builder() {
    let config = Config::default()
      .with_mmap_threshold(4096)
      .with_zero_fill_threshold(1024)
      .with_coalescing(Coalescing::Bidirectional);

    assert_eq!(config.arena_size, DEFAULT_ARENA_SIZE);
    assert_eq!(config.mmap_threshold, 4096);
    assert_eq!(config.zero_fill_threshold, Some(1024));
    assert_eq!(config.coalescing, Coalescing::Bidirectional);
  }
}
