use std::io;

use thiserror::Error;

/// Everything that can stop the allocator from serving a request.
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("zero-sized request")]
  ZeroSize,
  #[error("request size overflows the address space")]
  Overflow,
  #[error("program break cannot grow by {requested} bytes")]
  OutOfMemory { requested: usize },
  #[error("program break moved behind the heap: expected {expected:#x}, found {found:#x}")]
  NonContiguous { expected: usize, found: usize },
  #[error("cannot map {len} bytes: {source}")]
  MapFailed {
    len: usize,
    #[source]
    source: io::Error,
  },
  #[error("cannot unmap {len} bytes at {addr:#x}: {source}")]
  UnmapFailed {
    addr: usize,
    len: usize,
    #[source]
    source: io::Error,
  },
  #[error("{addr:#x} was not handed out by this allocator")]
  InvalidPointer { addr: usize },
  #[error("{addr:#x} is already free")]
  DoubleFree { addr: usize },
}
