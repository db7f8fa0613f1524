use std::io::Read;

use libc::sbrk;
use rbuddy::{HEADER_SIZE, allocate, free, reallocate, zero_allocate};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how the program break moves.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // Route internal events to stderr; filter with RUST_LOG, e.g.
  // RUST_LOG=rbuddy=debug to watch splits, joins and growth.
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) A small allocation. The first call bootstraps the heap: the
    //    break moves by one region slab, and the slab is split down to
    //    the smallest block that holds 16 bytes.
    // --------------------------------------------------------------------
    let first = allocate(16);
    println!("\n[1] allocate(16) = {:?} (block base = {:?})", first, first.sub(HEADER_SIZE));

    let first_ptr = first as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first = 0x{:X}", first_ptr.read());

    print_program_break("after first allocation");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) A second small allocation lands in the neighboring block; the
    //    break does not move because the region already has room.
    // --------------------------------------------------------------------
    let second = allocate(16);
    println!("\n[2] allocate(16) = {:?}", second);
    println!(
      "[2] Distance from first block: {} bytes",
      second as usize - first as usize
    );

    print_program_break("after second allocation");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Grow the first allocation. Its right-hand buddy is taken by the
    //    second allocation, so the payload relocates to a fresh block and
    //    the value written in step 1 travels with it.
    // --------------------------------------------------------------------
    let grown = reallocate(first, 200);
    println!("\n[3] reallocate(first, 200) = {:?}", grown);
    println!(
      "[3] Moved: {}, value preserved = 0x{:X}",
      grown != first,
      (grown as *mut u32).read()
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the second allocation, then grow the relocated block again.
    // --------------------------------------------------------------------
    free(second);
    let grown_again = reallocate(grown, 400);
    println!("\n[4] After free(second), reallocate(.., 400) = {:?}", grown_again);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A zeroed table of 32 u64 counters.
    // --------------------------------------------------------------------
    let table = zero_allocate(32, 8) as *mut u64;
    println!("\n[5] zero_allocate(32, 8) = {:?}", table);
    println!("[5] table[0] = {}, table[31] = {}", table.read(), table.add(31).read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) A large allocation that cannot fit in the initial region; watch
    //    the program break jump as the region doubles.
    // --------------------------------------------------------------------
    print_program_break("before large allocation");

    let big = allocate(64 * 1024);
    println!("\n[6] allocate(64 KiB) = {:?}", big);

    print_program_break("after large allocation");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) End of demo. Freed blocks coalesce back into the region, but the
    //    break never moves down; the OS reclaims everything on exit.
    // --------------------------------------------------------------------
    free(big);
    free(table as *mut u8);
    free(grown_again);

    print_program_break("end");
    println!("\n[7] End of example. The OS reclaims all memory on exit.");
  }
}
