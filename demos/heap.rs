use std::{io::Read, ptr};

use rheap::{global, os};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    os::program_break(),
  );
}

fn print_alloc(
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Allocated {} bytes, address = {:?}, program break = {:?}",
    size,
    addr,
    os::program_break()
  );
}

fn print_chain() {
  let stats = global::stats();
  println!(
    "    arena: {} blocks ({} free, {} free bytes), {} mapped blocks ({} bytes)",
    stats.heap.blocks,
    stats.heap.free_blocks,
    stats.heap.free_bytes,
    stats.mapped_blocks,
    stats.mapped_bytes,
  );
}

fn main() {
  env_logger::init();

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) The first small request preallocates the 128 KiB arena and splits
    //    it into the requested block and a free remainder.
    // --------------------------------------------------------------------
    let a = global::malloc(100);
    println!("\n[1] malloc(100)");
    print_alloc(100, a);
    print_chain();

    let b = global::malloc(200);
    println!("\n[1] malloc(200)");
    print_alloc(200, b);
    print_chain();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free the first block and ask for something slightly smaller.
    //    Best fit picks the freed 104 byte slot again.
    // --------------------------------------------------------------------
    global::free(a);
    let c = global::malloc(90);
    println!("\n[2] free(a), malloc(90)");
    print_alloc(90, c);
    println!("[2] c == a? {}", if c == a { "Yes, best fit reused the slot" } else { "No" });
    print_chain();

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) calloc below the page size stays in the arena and comes back zeroed.
    // --------------------------------------------------------------------
    let zeroed = global::calloc(16, 8);
    println!("\n[3] calloc(16, 8)");
    print_alloc(128, zeroed);
    println!("[3] all zero? {}", (0..128).all(|i| *zeroed.add(i) == 0));

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A request past the threshold gets its own mapping. The program
    //    break does not move.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big = global::malloc(200_000);
    println!("\n[4] malloc(200000)");
    print_alloc(200_000, big);
    ptr::write_bytes(big, 0xAB, 200_000);
    print_chain();

    print_program_break("after large alloc");
    block_until_enter_pressed();

    global::free(big);
    println!("\n[4] free(big) unmapped it");
    print_chain();

    // --------------------------------------------------------------------
    // 5) Growing `b` cannot happen in place while `zeroed` follows it, so
    //    realloc moves it and keeps the contents.
    // --------------------------------------------------------------------
    ptr::write_bytes(b, 0x11, 200);
    let grown = global::realloc(b, 4000);
    println!("\n[5] realloc(b, 4000)");
    print_alloc(4000, grown);
    println!("[5] contents kept? {}", (0..200).all(|i| *grown.add(i) == 0x11));
    print_chain();

    println!("\n[6] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
