//! Region growth primitives.
//!
//! The heap engine never manages a fixed buffer; it asks a [`Grower`] for
//! more bytes whenever a search comes up empty. The production grower
//! moves the process program break with `sbrk(2)`:
//!
//! ```text
//!   Virtual Memory Layout
//!   ┌─────────────────────┐ High addresses
//!   │       Stack         │ ↓ grows down
//!   │         │           │
//!   │         ▼           │
//!   │                     │
//!   │         ▲           │
//!   │         │           │
//!   │       Heap          │ ↑ grows up (via sbrk)
//!   ├─────────────────────┤ ← Program break (brk)
//!   │   BSS (uninit data) │
//!   ├─────────────────────┤
//!   │   Data (init data)  │
//!   ├─────────────────────┤
//!   │       Text          │
//!   └─────────────────────┘ Low addresses
//! ```
//!
//! Keeping the primitive behind a trait lets the engine run against any
//! source of monotonic, contiguous memory, which the tests use to drive
//! growth deterministically.

use libc::{c_void, intptr_t, sbrk};
use tracing::error;

/// A source of monotonically growing, contiguous memory.
pub(crate) trait Grower {
  /// Extends the managed range by `amount` bytes and returns the
  /// previous end, or `None` when no more memory can be obtained.
  /// `extend(0)` queries the current end without growing.
  fn extend(&mut self, amount: usize) -> Option<*mut u8>;
}

/// Grows by moving the program break.
pub(crate) struct BrkGrower;

impl Grower for BrkGrower {
  fn extend(&mut self, amount: usize) -> Option<*mut u8> {
    if amount > isize::MAX as usize {
      return None;
    }

    // sbrk returns the previous break, or (void*)-1 on failure.
    let previous = unsafe { sbrk(amount as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      error!(amount, "program break extension refused");
      return None;
    }

    Some(previous.cast())
  }
}

/// Bump-grower over a fixed slab, standing in for the program break in
/// tests that need deterministic exhaustion.
#[cfg(test)]
pub(crate) struct SlabGrower {
  base: *mut u8,
  capacity: usize,
  used: usize,
}

// The slab base is owned by the grower alone; tests hand the whole
// grower across threads behind a lock.
#[cfg(test)]
unsafe impl Send for SlabGrower {}

#[cfg(test)]
impl SlabGrower {
  pub fn new(capacity: usize) -> Self {
    Self {
      base: crate::buddy::check::aligned_slab(capacity),
      capacity,
      used: 0,
    }
  }
}

#[cfg(test)]
impl Grower for SlabGrower {
  fn extend(&mut self, amount: usize) -> Option<*mut u8> {
    if amount > self.capacity - self.used {
      return None;
    }

    let previous = unsafe { self.base.add(self.used) };
    self.used += amount;

    Some(previous)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn brk_grower_reports_the_current_break() {
    let mut grower = BrkGrower;

    let before = grower.extend(0).unwrap();
    let after = grower.extend(0).unwrap();

    assert_eq!(before, after);
  }

  #[test]
  fn brk_grower_extends_by_the_requested_amount() {
    let mut grower = BrkGrower;

    let previous = grower.extend(64).unwrap();
    let current = grower.extend(0).unwrap();

    // Another thread may have moved the break in between, so only the
    // lower bound is guaranteed.
    assert!(current as usize >= previous as usize + 64);
  }

  #[test]
  fn slab_grower_is_contiguous_and_bounded() {
    let mut grower = SlabGrower::new(256);

    let first = grower.extend(128).unwrap();
    let second = grower.extend(128).unwrap();

    assert_eq!(second as usize, first as usize + 128);
    assert!(grower.extend(1).is_none());
    assert_eq!(grower.extend(0).unwrap() as usize, first as usize + 256);
  }
}
