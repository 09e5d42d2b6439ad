use std::ptr;

use aligned_alloc::{AlignedAllocator, CountingAlloc, Host, LocalHost, HEADER_SIZE};

fn main() {
  // Engine over a counting libc heap so the raw traffic is visible.
  let alloc = AlignedAllocator::new(CountingAlloc::default());

  // --------------------------------------------------------------------
  // 1) A plain 1000-byte block.
  // --------------------------------------------------------------------
  let p = alloc.malloc(1000).expect("malloc");
  println!("[1] malloc(1000) -> {:p}, addr % 64 = {}", p, p.as_ptr() as usize % 64);
  println!(
    "[1] raw bytes reserved = {} (1000 + header {} + slack 63)",
    alloc.raw().live_bytes(),
    HEADER_SIZE
  );

  // --------------------------------------------------------------------
  // 2) Grow it: the first 1000 bytes survive, the result stays aligned.
  // --------------------------------------------------------------------
  unsafe { ptr::write_bytes(p.as_ptr(), 0xAB, 1000) };
  let q = unsafe { alloc.realloc(p.as_ptr(), 50_000) }.expect("realloc");
  println!(
    "[2] realloc -> {:p}, addr % 64 = {}, byte[999] = {:#X}",
    q,
    q.as_ptr() as usize % 64,
    unsafe { *q.as_ptr().add(999) }
  );

  // --------------------------------------------------------------------
  // 3) Free: the raw heap is balanced again.
  // --------------------------------------------------------------------
  unsafe { alloc.free(q.as_ptr()) };
  println!(
    "[3] after free: live blocks = {}, allocations = {}, frees = {}",
    alloc.raw().live_blocks(),
    alloc.raw().allocations(),
    alloc.raw().frees()
  );

  // --------------------------------------------------------------------
  // 4) Host policy switch.
  // --------------------------------------------------------------------
  let host = LocalHost::global();
  println!("\n[4] host handler = {}", host.handler().name());

  aligned_alloc::enable().expect("enable");
  let buf = host.alloc_buffer(8 * 1000).expect("buffer");
  println!(
    "[4] enabled: handler = {}, buffer at {:p}, addr % 64 = {}",
    host.handler().name(),
    buf.as_ptr(),
    buf.as_ptr() as usize % 64
  );

  aligned_alloc::disable().expect("disable");
  println!("[4] disabled: handler = {}", host.handler().name());

  if let Err(e) = aligned_alloc::disable() {
    println!("[4] second disable rejected: {e}");
  }

  // Still released by the handler that allocated it.
  println!("[4] dropping buffer owned by {}", buf.handler().name());
  drop(buf);
}
