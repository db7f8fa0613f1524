//! # rbuddy - A Buddy Memory Allocator Library
//!
//! This crate implements a **buddy allocator**: a dynamic memory manager
//! that carves a contiguous region into power-of-two sized blocks, splits
//! blocks on demand and merges freed neighbors back together.
//!
//! ## Overview
//!
//! ```text
//!   Buddy Allocation Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                     REGION (1024 bytes)                          │
//!   │                                                                  │
//!   │   allocate(16) splits the region down to the smallest            │
//!   │   power-of-two block that still holds the request:               │
//!   │                                                                  │
//!   │   ┌────┬────┬────────┬────────────┬──────────────┬────────────┐  │
//!   │   │ 32 │ 32 │   64   │    128     │     256      │    512     │  │
//!   │   └────┴────┴────────┴────────────┴──────────────┴────────────┘  │
//!   │     ▲                                                            │
//!   │     └── handed out; every other block is free                    │
//!   │                                                                  │
//!   │   free() walks back up: a freed block merges with its "buddy"    │
//!   │   (the unique sibling it was split from) as long as the buddy    │
//!   │   is free too, restoring the single 1024-byte block.             │
//!   │                                                                  │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each block carries a small header followed by the payload handed to
//! callers:
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │          Payload               │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size            │  │  ┌──────────────────────────┐  │
//!   │  │ is_free         │  │  │  size - HEADER_SIZE      │  │
//!   │  └─────────────────┘  │  │  usable bytes            │  │
//!   │                       │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── pointer returned to the caller,
//!                               aligned to MAX_ALIGN
//! ```
//!
//! ## Two Operating Modes
//!
//! - [`Arena`]: the caller supplies a raw region; the allocator manages
//!   only that region and never grows it.
//! - The heap-replacement quartet ([`allocate`], [`free`], [`reallocate`],
//!   [`zero_allocate`]): a process-wide heap bootstrapped from the
//!   program break via `sbrk` and grown on demand, serialized behind a
//!   global lock. With the `stdlib-override` feature the same quartet is
//!   exported under the C names for `LD_PRELOAD` interposition, and
//!   [`BuddyAlloc`] exposes it as a Rust [`GlobalAlloc`].
//!
//! [`GlobalAlloc`]: std::alloc::GlobalAlloc
//!
//! ## Crate Structure
//!
//! ```text
//!   rbuddy
//!   ├── align      - alignment macro (align_to!)
//!   ├── block      - block header and address arithmetic
//!   ├── buddy      - split / join / fit engine shared by both modes
//!   ├── arena      - caller-owned region variant
//!   ├── grow       - program-break growth primitive
//!   ├── heap       - process-wide heap, public quartet, GlobalAlloc
//!   └── ffi        - C symbol shim (feature "stdlib-override")
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! // Process-wide heap:
//! let ptr = rbuddy::allocate(256);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0xAB, 256);
//!     let bigger = rbuddy::reallocate(ptr, 1024);
//!     rbuddy::free(bigger);
//! }
//!
//! // Caller-owned arena (the backing must be aligned to the region size):
//! let backing = unsafe {
//!     std::alloc::alloc(std::alloc::Layout::from_size_align(4096, 4096).unwrap())
//! };
//! let mut arena = unsafe { rbuddy::Arena::init(backing, 4096).unwrap() };
//! let a = arena.allocate(100).unwrap();
//! unsafe { arena.free(a) };
//! ```
//!
//! ## Limitations
//!
//! - Block sizes are powers of two; a request just above a power-of-two
//!   payload boundary occupies the next size up.
//! - Payload alignment is fixed at the platform's maximum fundamental
//!   scalar alignment; larger alignments are not supported.
//! - Memory acquired from the operating system is never returned.
//! - The heap variant requires `sbrk` (POSIX systems).
//!
//! ## Safety
//!
//! The crate manages raw memory: handing out, resizing and reclaiming
//! payloads is inherently unsafe and the usual C allocation contracts
//! apply. Double frees and frees of foreign pointers are undefined
//! behavior and are not detected.

pub mod align;
mod arena;
mod block;
mod buddy;
#[cfg(feature = "stdlib-override")]
mod ffi;
mod grow;
mod heap;

pub use arena::{Arena, ArenaError};
pub use block::{HEADER_SIZE, MAX_ALIGN, MIN_BLOCK_SIZE};
pub use heap::{BuddyAlloc, INITIAL_REGION_SIZE, allocate, free, reallocate, zero_allocate};
