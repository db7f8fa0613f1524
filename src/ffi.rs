//! C-symbol shim for preload-based interposition.
//!
//! Enabled by the `stdlib-override` feature, this module exports the
//! process-wide heap under the standard C allocation names, so building
//! the crate as a `cdylib` yields a shared object that can be
//! `LD_PRELOAD`ed under unmodified binaries:
//!
//! ```text
//! cargo build --release --features stdlib-override
//! LD_PRELOAD=target/release/librbuddy.so ls
//! ```
//!
//! The shim is intentionally thin; every call forwards to the crate's
//! heap entry points and inherits their locking and failure behavior.

use std::ffi::c_void;

use crate::heap;

#[unsafe(no_mangle)]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
  heap::allocate(size).cast()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
  unsafe { heap::free(ptr.cast()) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(
  ptr: *mut c_void,
  size: usize,
) -> *mut c_void {
  unsafe { heap::reallocate(ptr.cast(), size).cast() }
}

#[unsafe(no_mangle)]
pub extern "C" fn calloc(
  items: usize,
  item_size: usize,
) -> *mut c_void {
  heap::zero_allocate(items, item_size).cast()
}
