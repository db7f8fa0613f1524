//! # Heap-Replacement Variant
//!
//! A process-wide buddy heap bootstrapped from the program break and grown
//! on demand. The four entry points ([`allocate`], [`free`], [`reallocate`],
//! [`zero_allocate`]) mirror the classic C allocation quartet, so the engine
//! can be interposed under unmodified binaries (see the `stdlib-override`
//! feature).
//!
//! ## Rotating cursor
//!
//! Unlike the arena, the heap does not scan from the front on every request.
//! A cursor remembers where the last operation left off and the search
//! rotates through the region from there, wrapping at the end:
//!
//! ```text
//!          next
//!           │
//!           ▼
//!   ┌───────┬───────┬───────────────┬───────────────┐
//!   │ used  │ free  │     used      │     free      │
//!   └───────┴───────┴───────────────┴───────────────┘
//!   ▲                                               │
//!   └──────────────── wrap ──────────────────────────┘
//!
//!   After an allocation the cursor moves past the chosen block.
//!   After a free it parks on the freed (and possibly merged) block,
//!   so the next search starts where memory just became available.
//! ```
//!
//! ## Growth
//!
//! When a full revolution of the cursor finds nothing, the region is
//! extended by moving the program break:
//!
//! ```text
//!   1) The region is one big free block: widen it in place.
//!
//!      ┌───────────────┐ sbrk  ┌───────────────────────────────┐
//!      │  4096 (free)  │  →    │          8192 (free)          │
//!      └───────────────┘       └───────────────────────────────┘
//!
//!   2) Otherwise: double the region, installing the new space as one
//!      free block at the old end, until the new block is big enough.
//!
//!      ┌───────┬───────┐ sbrk  ┌───────┬───────┬───────────────┐
//!      │ used  │ used  │  →    │ used  │ used  │  8192 (free)  │
//!      └───────┴───────┘       └───────┴───────┴───────────────┘
//! ```
//!
//! Both regimes keep every block a power of two and every junction on a
//! boundary compatible with the buddy rule, so split and join keep
//! working across growth seams. Nothing is committed until the break
//! extension succeeds; a refused extension surfaces as a failed
//! allocation with the region untouched.
//!
//! ## Concurrency
//!
//! All global state (`start`, `end`, cursor) lives in one [`Heap`] value
//! behind a process-wide mutex. Every public entry point locks exactly
//! once and runs non-locking internals, so `reallocate` can reuse the
//! allocate and free paths without reentering the lock. The engine is not
//! async-signal-safe; do not allocate from signal handlers.

use std::{
  alloc::{GlobalAlloc, Layout},
  ptr,
  sync::{Mutex, PoisonError},
};

use static_assertions::const_assert;
use tracing::debug;

use crate::align_to;
use crate::block::{Block, HEADER_SIZE, MAX_ALIGN, MIN_BLOCK_SIZE};
use crate::buddy::{self, Region};
use crate::grow::{BrkGrower, Grower};

/// Size of the first region slab claimed from the program break.
pub const INITIAL_REGION_SIZE: usize = 4096;

const_assert!(INITIAL_REGION_SIZE.is_power_of_two());
const_assert!(INITIAL_REGION_SIZE >= MIN_BLOCK_SIZE);

/// The process-wide heap state: the managed region, the rotating search
/// cursor and the source of new memory.
pub(crate) struct Heap<G: Grower> {
  region: Region,
  next: *mut Block,
  grower: G,
}

// The raw pointers only ever reference memory owned by the heap itself,
// and all access is serialized by the global lock.
unsafe impl<G: Grower + Send> Send for Heap<G> {}

impl<G: Grower> Heap<G> {
  /// One-time setup: aligns the break up to `MAX_ALIGN` by consuming the
  /// padding bytes, claims the initial slab and installs it as a single
  /// free block.
  pub fn bootstrap(mut grower: G) -> Option<Self> {
    let base = grower.extend(0)?;

    let pad = align_to!(base as usize, MAX_ALIGN) - base as usize;
    if pad > 0 {
      grower.extend(pad)?;
    }

    let start = grower.extend(INITIAL_REGION_SIZE)?;
    debug_assert_eq!(start as usize % MAX_ALIGN, 0);

    let region = unsafe { Region::install(start, INITIAL_REGION_SIZE) };

    debug!(start = ?region.start, size = INITIAL_REGION_SIZE, "heap region installed");

    Some(Self {
      region,
      next: region.first(),
      grower,
    })
  }

  /// The block after `block` in rotation order, wrapping back to the
  /// front of the region.
  unsafe fn after(
    &self,
    block: *mut Block,
  ) -> *mut Block {
    unsafe {
      let next = Block::next(block);

      if next.cast::<u8>() == self.region.end {
        self.region.first()
      } else {
        next
      }
    }
  }

  /// One full revolution of the cursor, looking for a free block whose
  /// payload holds `size` bytes.
  unsafe fn search(
    &self,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let origin = self.next;
      let mut block = origin;

      loop {
        if (*block).is_free && Block::payload_size(block) >= size {
          return Some(block);
        }

        block = self.after(block);

        if block == origin {
          return None;
        }
      }
    }
  }

  /// Extends the region until it contains a free block able to hold
  /// `size` payload bytes, and returns that block. The region is left
  /// untouched when the break refuses to move.
  unsafe fn grow(
    &mut self,
    size: usize,
  ) -> Option<*mut Block> {
    let needed = size.checked_add(HEADER_SIZE)?;

    unsafe {
      let first = self.region.first();

      // The whole region is one free block: widen it in place instead
      // of appending a second one.
      if Block::next(first).cast::<u8>() == self.region.end && (*first).is_free {
        let old_size = (*first).size;

        let mut new_size = old_size;
        while new_size < needed {
          new_size = new_size.checked_mul(2)?;
        }

        let base = self.grower.extend(new_size - old_size)?;
        if base != self.region.end {
          // Someone else moved the break; the new range is not
          // contiguous with the region and cannot be tiled.
          return None;
        }

        (*first).size = new_size;
        self.region.end = Block::next(first).cast();

        debug!(old_size, new_size, "widened the sole region block");

        return Some(first);
      }

      // General case: double the region until the newly installed tail
      // block is big enough. Each new block starts at an offset equal to
      // its own size, which keeps the buddy rule intact across the seam.
      loop {
        let current_size = self.region.len();
        let base = self.grower.extend(current_size)?;
        if base != self.region.end {
          return None;
        }

        let block = buddy::install_block(base, current_size);
        self.region.end = base.add(current_size);

        debug!(current_size, "region doubled");

        if current_size >= needed {
          return Some(block);
        }
      }
    }
  }

  unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    unsafe {
      let block = match self.search(size) {
        Some(block) => block,
        None => match self.grow(size) {
          Some(block) => block,
          None => {
            debug!(size, "allocation failed, region exhausted");
            return ptr::null_mut();
          }
        },
      };

      let payload = buddy::fit(block, size);
      self.next = self.after(block);

      payload
    }
  }

  unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    unsafe {
      let block = Block::from_payload(ptr);
      self.next = self.region.join(block);
    }
  }

  unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if ptr.is_null() {
        return self.allocate(size);
      }

      if size == 0 {
        self.free(ptr);
        return ptr::null_mut();
      }

      let block = Block::from_payload(ptr);
      let old_payload = Block::payload_size(block);

      // Shrink in place, handing the trimmed halves back to the region.
      if old_payload >= size {
        let payload = buddy::fit(block, size);
        self.next = self.after(block);

        return payload;
      }

      if self.absorb_rightward(block, size) {
        return ptr;
      }

      // Relocate. Allocating before freeing costs a transient copy of
      // the block but keeps the original allocation intact when the
      // request cannot be satisfied.
      let new = self.allocate(size);
      if new.is_null() {
        debug!(size, "reallocation failed, original allocation kept");
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(ptr, new, old_payload);
      self.free(ptr);

      new
    }
  }

  /// Widens `block` in place by absorbing free right-hand buddies of
  /// matching size. The widened size is committed only once it can hold
  /// `size` payload bytes; on failure nothing is written.
  unsafe fn absorb_rightward(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> bool {
    unsafe {
      let mut grown = (*block).size;

      while grown - HEADER_SIZE < size {
        if !self.region.is_left(block, grown) {
          return false;
        }

        let buddy = block.cast::<u8>().add(grown);
        if buddy == self.region.end {
          return false;
        }

        let buddy = buddy.cast::<Block>();
        if !(*buddy).is_free || (*buddy).size != grown {
          return false;
        }

        grown *= 2;
      }

      (*block).size = grown;

      // The cursor may be parked on one of the absorbed headers.
      let cursor = self.next.cast::<u8>();
      if cursor > block.cast::<u8>() && cursor < Block::next(block).cast::<u8>() {
        self.next = self.after(block);
      }

      debug!(grown, "widened a block in place");

      true
    }
  }

  unsafe fn zero_allocate(
    &mut self,
    items: usize,
    item_size: usize,
  ) -> *mut u8 {
    let Some(total) = items.checked_mul(item_size) else {
      return ptr::null_mut();
    };

    unsafe {
      let payload = self.allocate(total);

      if !payload.is_null() {
        ptr::write_bytes(payload, 0, total);
      }

      payload
    }
  }
}

static HEAP: Mutex<Option<Heap<BrkGrower>>> = Mutex::new(None);

/// Runs `f` on the process-wide heap, bootstrapping it on first entry.
/// This is the single lock acquisition on every public path; everything
/// underneath runs lock-free.
fn with_heap<R>(f: impl FnOnce(&mut Heap<BrkGrower>) -> R) -> R {
  let mut state = HEAP.lock().unwrap_or_else(PoisonError::into_inner);

  let heap = state.get_or_insert_with(|| {
    Heap::bootstrap(BrkGrower).expect("program break unavailable, cannot bootstrap the heap")
  });

  f(heap)
}

/// Allocates `size` bytes from the process-wide heap.
///
/// The returned address is aligned to the platform's maximum fundamental
/// scalar alignment and points at a payload of at least `size` bytes that
/// no other live allocation overlaps. Returns null when `size` is zero or
/// when the operating system refuses to extend the heap.
pub fn allocate(size: usize) -> *mut u8 {
  with_heap(|heap| unsafe { heap.allocate(size) })
}

/// Returns an allocation to the process-wide heap. Passing null is a
/// no-op.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by [`allocate`],
/// [`reallocate`] or [`zero_allocate`] and not freed since. The payload
/// must no longer be accessed after this call.
pub unsafe fn free(ptr: *mut u8) {
  with_heap(|heap| unsafe { heap.free(ptr) })
}

/// Resizes an allocation, preserving the payload prefix that fits.
///
/// A null `ptr` behaves as [`allocate`]; a zero `size` behaves as
/// [`free`] and returns null. Otherwise the result holds at least `size`
/// bytes, the first `min(old_size, size)` of which are the old payload.
/// On failure null is returned and the original allocation is left
/// intact.
///
/// Whenever possible the block is resized in place: shrinks split it
/// back down, and grows absorb free neighboring buddies to the right.
/// Only when neither works is the payload moved to a fresh block.
///
/// # Safety
///
/// A non-null `ptr` must have been returned by [`allocate`],
/// [`reallocate`] or [`zero_allocate`] and not freed since. Unless the
/// call fails, the old pointer must no longer be accessed.
pub unsafe fn reallocate(
  ptr: *mut u8,
  size: usize,
) -> *mut u8 {
  with_heap(|heap| unsafe { heap.reallocate(ptr, size) })
}

/// Allocates `items * item_size` bytes, zero-initialized. Returns null
/// when the product overflows or the underlying allocation fails.
pub fn zero_allocate(
  items: usize,
  item_size: usize,
) -> *mut u8 {
  with_heap(|heap| unsafe { heap.zero_allocate(items, item_size) })
}

/// Adapter exposing the process-wide heap as a [`GlobalAlloc`], so the
/// crate can back a Rust program directly:
///
/// ```rust,ignore
/// #[global_allocator]
/// static ALLOCATOR: rbuddy::BuddyAlloc = rbuddy::BuddyAlloc;
/// ```
///
/// Layout alignments above the platform's maximum fundamental scalar
/// alignment are not supported and fail with null. Log events are
/// emitted through `tracing` and are no-ops without a subscriber; do not
/// install a subscriber that allocates while this is the global
/// allocator.
pub struct BuddyAlloc;

unsafe impl GlobalAlloc for BuddyAlloc {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > MAX_ALIGN {
      return ptr::null_mut();
    }

    allocate(layout.size())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { free(ptr) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > MAX_ALIGN {
      return ptr::null_mut();
    }

    zero_allocate(layout.size(), 1)
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > MAX_ALIGN {
      return ptr::null_mut();
    }

    unsafe { reallocate(ptr, new_size) }
  }
}
