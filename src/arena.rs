//! # Arena Variant
//!
//! A stateless façade over a caller-owned region. The arena never grows:
//! once the region is exhausted, allocation fails until something is
//! freed. Searches always scan from the front of the region, so the
//! arena carries no cursor and no global state; distinct arenas are
//! fully independent.
//!
//! Concurrent use of a single arena requires external synchronization.

use std::{fmt, ptr::NonNull};

use tracing::debug;

use crate::block::{Block, MAX_ALIGN, MIN_BLOCK_SIZE};
use crate::buddy::{self, Region};

/// The caller-supplied region cannot hold a single minimum-sized block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
  RegionTooSmall,
}

impl fmt::Display for ArenaError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      ArenaError::RegionTooSmall => {
        write!(f, "region cannot hold a single block of {MIN_BLOCK_SIZE} bytes")
      }
    }
  }
}

impl std::error::Error for ArenaError {}

/// A buddy allocator over a region of memory owned by the caller.
///
/// ```rust,ignore
/// use std::alloc::{alloc, Layout};
/// use rbuddy::Arena;
///
/// let backing = unsafe { alloc(Layout::from_size_align(4096, 4096).unwrap()) };
/// let mut arena = unsafe { Arena::init(backing, 4096)? };
///
/// let ptr = arena.allocate(128).expect("arena has room");
/// unsafe {
///   ptr.as_ptr().write_bytes(0xAB, 128);
///   arena.free(ptr);
/// }
/// ```
pub struct Arena {
  region: Region,
}

impl Arena {
  /// Takes over `size` bytes at `base`, rounding `size` down to the
  /// greatest power of two that fits, and installs one free block
  /// covering the rounded region.
  ///
  /// # Errors
  ///
  /// Fails when the rounded size cannot hold even a minimum block.
  ///
  /// # Safety
  ///
  /// `base` must be valid for reads and writes of `size` bytes for the
  /// lifetime of the arena, must not be touched by anything else during
  /// that time, and must be aligned to the rounded region size (which
  /// also makes every payload land on a `MAX_ALIGN` boundary).
  pub unsafe fn init(
    base: *mut u8,
    size: usize,
  ) -> Result<Arena, ArenaError> {
    if size < MIN_BLOCK_SIZE {
      return Err(ArenaError::RegionTooSmall);
    }

    let rounded = floor_power_of_two(size);
    debug_assert_eq!(base as usize % MAX_ALIGN, 0);

    debug!(?base, size, rounded, "arena installed");

    Ok(Arena {
      region: unsafe { Region::install(base, rounded) },
    })
  }

  /// The managed region size after rounding.
  pub fn size(&self) -> usize {
    self.region.len()
  }

  /// Hands out `size` bytes from the region, or `None` when the request
  /// is zero or no free block can hold it.
  ///
  /// The first free block large enough is trimmed down by repeated
  /// splitting and its payload returned.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size == 0 {
      return None;
    }

    let candidate = self
      .region
      .blocks()
      .find(|&block| unsafe { (*block).is_free && Block::payload_size(block) >= size })?;

    NonNull::new(unsafe { buddy::fit(candidate, size) })
  }

  /// Returns an allocation to the region, merging it with free buddies
  /// as far up as possible.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`Arena::allocate`] on this arena
  /// and not freed since.
  pub unsafe fn free(
    &mut self,
    ptr: NonNull<u8>,
  ) {
    unsafe {
      self.region.join(Block::from_payload(ptr.as_ptr()));
    }
  }
}

fn floor_power_of_two(value: usize) -> usize {
  debug_assert!(value > 0);

  1 << (usize::BITS - 1 - value.leading_zeros())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::HEADER_SIZE;
  use crate::buddy::check::{aligned_slab, assert_invariants, tiling};

  fn arena_of(size: usize) -> Arena {
    unsafe { Arena::init(aligned_slab(size), size).unwrap() }
  }

  #[test]
  fn init_rounds_down_to_a_power_of_two() {
    let base = aligned_slab(2048);

    let arena = unsafe { Arena::init(base, 1500).unwrap() };

    assert_eq!(arena.size(), 1024);
    assert_eq!(tiling(&arena.region), [1024]);
  }

  #[test]
  fn init_rejects_a_region_below_the_minimum_block() {
    let base = aligned_slab(MIN_BLOCK_SIZE);

    let result = unsafe { Arena::init(base, MIN_BLOCK_SIZE - 1) };

    assert_eq!(result.err(), Some(ArenaError::RegionTooSmall));
  }

  #[test]
  fn zero_sized_requests_fail() {
    let mut arena = arena_of(1024);

    assert!(arena.allocate(0).is_none());
    assert_eq!(tiling(&arena.region), [1024]);
  }

  #[test]
  fn small_allocation_splits_down_to_the_minimum_block() {
    let mut arena = arena_of(1024);

    let a = arena.allocate(16).unwrap();

    assert_eq!(a.as_ptr() as usize, arena.region.start as usize + HEADER_SIZE);
    assert_eq!(tiling(&arena.region), [32, 32, 64, 128, 256, 512]);
    assert_invariants(&arena.region);

    unsafe { arena.free(a) };

    assert_eq!(tiling(&arena.region), [1024]);
    assert_invariants(&arena.region);
  }

  #[test]
  fn frees_coalesce_in_allocation_order() {
    let mut arena = arena_of(1024);

    let a = arena.allocate(16).unwrap();
    let b = arena.allocate(16).unwrap();

    unsafe {
      arena.free(a);
      arena.free(b);
    }

    assert_eq!(tiling(&arena.region), [1024]);
    assert_invariants(&arena.region);
  }

  #[test]
  fn frees_coalesce_in_reverse_order() {
    let mut arena = arena_of(1024);

    let a = arena.allocate(16).unwrap();
    let b = arena.allocate(16).unwrap();

    unsafe {
      arena.free(b);
      arena.free(a);
    }

    assert_eq!(tiling(&arena.region), [1024]);
    assert_invariants(&arena.region);
  }

  #[test]
  fn oversized_payload_takes_the_whole_region() {
    let mut arena = arena_of(1024);

    // 500 bytes do not fit the 496-byte payload of a 512 block, so the
    // region-sized block is handed out unsplit.
    let a = arena.allocate(500).unwrap();

    assert_eq!(tiling(&arena.region), [1024]);
    assert!(arena.allocate(500).is_none());

    unsafe { arena.free(a) };

    assert_eq!(tiling(&arena.region), [1024]);
  }

  #[test]
  fn region_fills_up_block_by_block() {
    let mut arena = arena_of(1024);

    // 200-byte payloads occupy 256-byte blocks; four of them tile the
    // region exactly, and a fifth must fail.
    let ptrs: Vec<_> = (0..4).map(|_| arena.allocate(200).unwrap()).collect();

    assert_eq!(tiling(&arena.region), [256, 256, 256, 256]);
    assert!(arena.allocate(200).is_none());
    assert_invariants(&arena.region);

    for ptr in ptrs {
      unsafe { arena.free(ptr) };
    }

    assert_eq!(tiling(&arena.region), [1024]);
  }

  #[test]
  fn whole_region_payload_succeeds() {
    let mut arena = arena_of(1024);

    let a = arena.allocate(1024 - HEADER_SIZE).unwrap();

    assert_eq!(tiling(&arena.region), [1024]);
    assert_invariants(&arena.region);

    unsafe { arena.free(a) };
  }

  #[test]
  fn one_byte_too_many_fails_without_touching_the_region() {
    let mut arena = arena_of(1024);

    assert!(arena.allocate(1024 - HEADER_SIZE + 1).is_none());
    assert_eq!(tiling(&arena.region), [1024]);
    assert!(unsafe { (*arena.region.first()).is_free });
  }

  #[test]
  fn live_payloads_do_not_overlap() {
    let mut arena = arena_of(1024);

    let sizes = [16usize, 40, 100, 16, 200];
    let ptrs: Vec<_> = sizes
      .iter()
      .map(|&size| (arena.allocate(size).unwrap().as_ptr() as usize, size))
      .collect();

    for (i, &(start, size)) in ptrs.iter().enumerate() {
      for &(other_start, other_size) in &ptrs[i + 1..] {
        let disjoint = start + size <= other_start || other_start + other_size <= start;
        assert!(disjoint, "payloads overlap");
      }
    }

    assert_invariants(&arena.region);
  }

  #[test]
  fn payloads_are_aligned_and_writable() {
    let mut arena = arena_of(4096);

    for &size in &[1usize, 16, 33, 512] {
      let ptr = arena.allocate(size).unwrap();

      assert_eq!(ptr.as_ptr() as usize % MAX_ALIGN, 0);

      unsafe { ptr.as_ptr().write_bytes(0x5A, size) };
    }

    assert_invariants(&arena.region);
  }
}
