use std::{
  mem,
  ptr::{self, NonNull},
};

use crate::align;

/// Bytes occupied by a [`Block`] header in front of every payload.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

/// Where a block stands in its lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  /// Part of the arena chain and available for reuse.
  Free,
  /// Part of the arena chain and handed out to a caller.
  Allocated,
  /// Backed by a dedicated page mapping, outside the chain.
  Mapped,
}

impl Status {
  pub const fn from_raw(raw: u8) -> Option<Self> {
    match raw {
      0 => Some(Self::Free),
      1 => Some(Self::Allocated),
      2 => Some(Self::Mapped),
      _ => None,
    }
  }
}

/// Metadata record written right before each payload.
///
/// ```text
///   ┌──────┬────────┬──────┬──────┬────────────────────────────┐
///   │ size │ status │ prev │ next │      size bytes payload    │
///   └──────┴────────┴──────┴──────┴────────────────────────────┘
///   ◄──────────── HEADER_SIZE ────►▲
///                                  └── pointer returned to the caller
/// ```
#[repr(C)]
pub struct Block {
  pub size: usize,
  pub status: Status,
  pub prev: *mut Block,
  pub next: *mut Block,
}

impl Block {
  pub const fn new(
    size: usize,
    status: Status,
    prev: *mut Block,
    next: *mut Block,
  ) -> Self {
    Self {
      size,
      status,
      prev,
      next,
    }
  }

  /// Returns the payload address of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a header followed by its payload.
  pub unsafe fn payload(block: *mut Block) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(block.cast::<u8>().add(HEADER_SIZE)) }
  }

  /// Recovers the header sitting in front of a payload address.
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by [`Block::payload`].
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) }.cast::<Block>()
  }

  /// Reads the status byte of a header that may not hold a valid
  /// [`Status`], such as one recovered from a caller pointer.
  ///
  /// # Safety
  ///
  /// `block` must point to readable memory of at least a header's size.
  pub unsafe fn raw_status(block: *const Block) -> Option<Status> {
    Status::from_raw(unsafe { ptr::addr_of!((*block).status).cast::<u8>().read() })
  }

  /// First byte past the payload of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to an initialized header.
  pub unsafe fn end(block: *mut Block) -> *mut u8 {
    unsafe { block.cast::<u8>().add(HEADER_SIZE + (*block).size) }
  }
}

/// Read-only snapshot of a chain block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the header.
  pub addr: usize,
  /// Usable payload bytes.
  pub size: usize,
  pub status: Status,
}

impl BlockInfo {
  /// Address of the payload handed to callers.
  pub fn payload(&self) -> usize {
    self.addr + HEADER_SIZE
  }
}
