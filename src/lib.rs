//! # rheap - a brk/mmap memory allocator
//!
//! This crate implements the `malloc` family on top of two OS primitives:
//! the program break (`sbrk(2)`), which backs a growable **arena** of
//! reusable blocks, and anonymous mappings (`mmap(2)`), which back large
//! requests one by one.
//!
//! ## Overview
//!
//! ```text
//!   allocate(size)
//!        │
//!        ▼
//!   align to 8, add header ──── total >= threshold ───► own mapping (Mapped)
//!        │
//!        │ total < threshold
//!        ▼
//!   arena preallocated? ── no ──► sbrk(128 KiB), one FREE block
//!        │
//!        ▼
//!   best-fit FREE block ── none ──► free tail? grow by shortfall : append
//!        │
//!        ▼
//!   split if the leftover can hold a block, mark ALLOCATED
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Alignment macro and checked variant
//!   ├── block      - Block header embedded before each payload
//!   ├── heap       - Arena chain: best fit, split, coalesce, growth
//!   ├── mapped     - Large blocks backed by their own mapping
//!   ├── allocator  - OsAllocator: routing and the public entry points
//!   ├── config     - Arena size, thresholds, coalescing mode
//!   ├── os         - MemorySource trait and the sbrk/mmap implementation
//!   ├── toy        - In-process MemorySource for tests and experiments
//!   └── global     - Process-wide allocator behind a lock
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::{Config, OsAllocator, toy::ToyMemory};
//!
//! let mut allocator = OsAllocator::new(ToyMemory::new(1 << 20), Config::DEFAULT);
//!
//! let a = allocator.allocate(100);
//! let b = allocator.allocate(200);
//! unsafe { allocator.release(a) };
//!
//! // Best fit hands the freed slot out again.
//! let c = allocator.allocate(90);
//! assert_eq!(a, c);
//!
//! unsafe {
//!   allocator.release(b);
//!   allocator.release(c);
//! }
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ status          │  │  │                          │  │
//!   │  │ prev: ptr/null  │  │  │     N bytes usable       │  │
//!   │  │ next: ptr/null  │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      32 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded core**: `OsAllocator` takes `&mut self`; only
//!   [`global`] adds a lock.
//! - **Backward coalescing by default**: a released block only merges into
//!   its predecessor unless [`Coalescing::Bidirectional`] is configured.
//! - **The arena never shrinks**: the break is not moved back.
//! - **Unix-only**: requires `libc`, `sbrk` and `mmap`.
//!
//! ## Safety
//!
//! Releasing and resizing take raw pointers and are `unsafe`. The arena
//! assumes nothing else moves the program break while it grows; when
//! something does, growth fails instead of corrupting the chain.

pub mod align;
pub mod allocator;
pub mod block;
pub mod config;
pub mod error;
pub mod global;
pub mod heap;
pub mod mapped;
pub mod os;
pub mod toy;

pub use allocator::{OsAllocator, Stats};
pub use block::{BlockInfo, HEADER_SIZE, Status};
pub use config::{Coalescing, Config};
pub use error::AllocError;
pub use os::{MemorySource, System};
