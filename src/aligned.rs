use std::ptr::{self, NonNull};

use crate::{
  align::{checked_padded_size, is_aligned},
  config::AllocatorConfig,
  error::{Error, Result},
  header::{HEADER_SIZE, Header},
  raw::{LibcAlloc, RawAlloc},
};

/// Alignment-correcting layer over a [`RawAlloc`].
///
/// Every block is over-allocated by `HEADER_SIZE + alignment - 1` bytes; the
/// first aligned address with room for a [`Header`] before it is returned and
/// the header records the raw pointer and the requested size.
///
/// The engine keeps no allocator-wide mutable state, so it may be shared
/// between threads whenever `A` can.
///
/// # Safety
///
/// Double frees, freeing pointers that did not come from this instance, and
/// use after free are not detected, exactly as with `malloc`/`free`.
#[derive(Debug)]
pub struct AlignedAllocator<A = LibcAlloc> {
  raw: A,
  config: AllocatorConfig,
}

impl AlignedAllocator<LibcAlloc> {
  /// 64-byte aligned blocks from the C heap.
  pub const fn libc() -> Self {
    Self::new(LibcAlloc)
  }
}

impl<A: RawAlloc> AlignedAllocator<A> {
  /// An engine with the default configuration.
  pub const fn new(raw: A) -> Self {
    Self {
      raw,
      config: AllocatorConfig::new(),
    }
  }

  pub fn with_config(
    raw: A,
    config: AllocatorConfig,
  ) -> Result<Self> {
    config.validate()?;
    Ok(Self { raw, config })
  }

  pub fn alignment(&self) -> usize {
    self.config.alignment
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn raw(&self) -> &A {
    &self.raw
  }

  /// Allocates `size` usable bytes at an aligned address.
  pub fn malloc(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let padded =
      checked_padded_size(size, HEADER_SIZE, self.alignment()).ok_or(Error::Overflow)?;

    let raw = unsafe { self.raw.malloc(padded) };
    if raw.is_null() {
      return Err(Error::Allocation { size: padded });
    }

    let aligned = unsafe { self.place(raw, size) };
    log::trace!("malloc({size}) -> {aligned:p} (raw {raw:p})");
    Ok(aligned)
  }

  /// Allocates `count * elem_size` zeroed bytes.
  pub fn calloc(
    &self,
    count: usize,
    elem_size: usize,
  ) -> Result<NonNull<u8>> {
    let size = count.checked_mul(elem_size).ok_or(Error::Overflow)?;
    let ptr = self.malloc(size)?;
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
    log::trace!("calloc({count}, {elem_size}) -> {ptr:p}");
    Ok(ptr)
  }

  /// Resizes a block, preserving the first `min(old, new_size)` bytes.
  ///
  /// A null `ptr` behaves like [`malloc`](Self::malloc). On failure the old
  /// block is still valid and unchanged.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator. On
  /// success the old pointer must no longer be used.
  pub unsafe fn realloc(
    &self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    if ptr.is_null() {
      return self.malloc(new_size);
    }

    let header = unsafe { Header::read_before(ptr) };

    if self.resizes_in_place(header.size, new_size) {
      return unsafe { self.resize_raw(ptr, header, new_size) };
    }

    let new_ptr = self.malloc(new_size)?;
    unsafe {
      ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), header.size.min(new_size));
      self.raw.free(header.raw);
    }
    log::trace!("realloc({ptr:p}, {new_size}) -> {new_ptr:p} (copied)");
    Ok(new_ptr)
  }

  /// Releases a block. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this allocator.
  pub unsafe fn free(
    &self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let header = unsafe { Header::read_before(ptr) };
    log::trace!("free({ptr:p}) size={} raw={:p}", header.size, header.raw);
    unsafe { self.raw.free(header.raw) }
  }

  /// The size requested when `ptr` was allocated or last resized.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *const u8,
  ) -> usize {
    unsafe { Header::read_before(ptr).size }
  }

  /// Shrinks, and blocks of at least `resize_in_place_min` bytes, go through
  /// the underlying realloc: a shrink usually stays where it is and large
  /// blocks are usually mmap-backed and page aligned.
  fn resizes_in_place(
    &self,
    old_size: usize,
    new_size: usize,
  ) -> bool {
    A::RESIZES
      && self
        .config
        .resize_in_place_min
        .is_some_and(|min| new_size <= old_size || old_size >= min)
  }

  /// Writes the header into a fresh raw block and returns the aligned
  /// address inside it.
  unsafe fn place(
    &self,
    raw: *mut u8,
    size: usize,
  ) -> NonNull<u8> {
    let aligned = unsafe { raw.add(self.aligned_offset(raw)) };
    debug_assert!(is_aligned(aligned as usize, self.alignment()));

    unsafe {
      Header::new(raw, size).write_before(aligned);
      NonNull::new_unchecked(aligned)
    }
  }

  /// Offset from `raw` to the first aligned address at least `HEADER_SIZE`
  /// bytes in. Always `<= HEADER_SIZE + alignment - 1`, so it cannot wrap for
  /// a block of the padded size.
  fn aligned_offset(
    &self,
    raw: *mut u8,
  ) -> usize {
    let start = raw as usize + HEADER_SIZE;
    crate::align_to!(start, self.alignment()) - raw as usize
  }

  /// Grows or shrinks through the underlying realloc. If the new raw block
  /// lands at a different alignment offset the payload is shifted inside it;
  /// the padded size always leaves room for that.
  unsafe fn resize_raw(
    &self,
    ptr: *mut u8,
    header: Header,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    let padded =
      checked_padded_size(new_size, HEADER_SIZE, self.alignment()).ok_or(Error::Overflow)?;
    let old_offset = header.offset_of(ptr);

    let new_raw = unsafe { self.raw.realloc(header.raw, padded) };
    if new_raw.is_null() {
      return Err(Error::Allocation { size: padded });
    }

    let new_offset = self.aligned_offset(new_raw);
    let kept = header.size.min(new_size);

    unsafe {
      let aligned = new_raw.add(new_offset);
      if new_offset != old_offset {
        log::warn!(
          "realloc moved {ptr:p} to unaligned {new_raw:p}, shifting {kept} bytes by {} -> {}",
          old_offset,
          new_offset
        );
        ptr::copy(new_raw.add(old_offset), aligned, kept);
      }
      Header::new(new_raw, new_size).write_before(aligned);
      log::trace!("realloc({ptr:p}, {new_size}) -> {aligned:p} (resized)");
      Ok(NonNull::new_unchecked(aligned))
    }
  }
}

impl Default for AlignedAllocator<LibcAlloc> {
  fn default() -> Self {
    Self::libc()
  }
}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng, rngs::StdRng};

  use super::*;
  use crate::raw::CountingAlloc;

  fn counting(config: AllocatorConfig) -> AlignedAllocator<CountingAlloc> {
    AlignedAllocator::with_config(CountingAlloc::default(), config).unwrap()
  }

  fn fill(
    ptr: NonNull<u8>,
    len: usize,
  ) {
    for i in 0..len {
      unsafe { *ptr.as_ptr().add(i) = (i % 251) as u8 };
    }
  }

  fn check(
    ptr: NonNull<u8>,
    len: usize,
  ) {
    for i in 0..len {
      assert_eq!(unsafe { *ptr.as_ptr().add(i) }, (i % 251) as u8, "byte {i}");
    }
  }

  #[test]
  fn test_malloc_1000_is_aligned_and_balanced() {
    let alloc = counting(AllocatorConfig::default());

    let p = alloc.malloc(1000).unwrap();
    assert_eq!(p.as_ptr() as usize % 64, 0);
    assert_eq!(alloc.raw().live_bytes(), 1000 + HEADER_SIZE + 63);
    fill(p, 1000);
    check(p, 1000);
    assert_eq!(unsafe { alloc.usable_size(p.as_ptr()) }, 1000);

    unsafe { alloc.free(p.as_ptr()) };
    assert_eq!(alloc.raw().live_bytes(), 0);
    assert_eq!(alloc.raw().allocations(), alloc.raw().frees());
  }

  #[test]
  fn test_random_sizes_are_aligned() {
    let mut rng = StdRng::seed_from_u64(0x64);

    for alignment in [8, 16, 64, 256, 4096] {
      let alloc = counting(AllocatorConfig::new().with_alignment(alignment));
      let mut blocks = Vec::new();

      for _ in 0..200 {
        let size = rng.random_range(0..10_000);
        let p = alloc.malloc(size).unwrap();
        assert!(is_aligned(p.as_ptr() as usize, alignment));
        blocks.push(p);
      }

      for p in blocks {
        unsafe { alloc.free(p.as_ptr()) };
      }
      assert_eq!(alloc.raw().live_blocks(), 0);
    }
  }

  #[test]
  fn test_zero_size_blocks_are_distinct() {
    let alloc = counting(AllocatorConfig::default());

    let a = alloc.malloc(0).unwrap();
    let b = alloc.malloc(0).unwrap();
    assert_ne!(a, b);
    assert!(is_aligned(a.as_ptr() as usize, 64));

    unsafe {
      alloc.free(a.as_ptr());
      alloc.free(b.as_ptr());
    }
    assert_eq!(alloc.raw().live_blocks(), 0);
  }

  #[test]
  fn test_free_null_is_noop() {
    let alloc = counting(AllocatorConfig::default());
    unsafe { alloc.free(ptr::null_mut()) };
    assert_eq!(alloc.raw().frees(), 0);
  }

  #[test]
  fn test_malloc_overflow_allocates_nothing() {
    let alloc = counting(AllocatorConfig::default());

    assert_eq!(alloc.malloc(usize::MAX), Err(Error::Overflow));
    assert_eq!(alloc.malloc(usize::MAX - HEADER_SIZE), Err(Error::Overflow));
    assert_eq!(alloc.raw().allocations(), 0);
  }

  #[test]
  fn test_malloc_failure_reports_padded_size() {
    let alloc = counting(AllocatorConfig::default());
    alloc.raw().fail_requests_over(100);

    assert_eq!(
      alloc.malloc(1000),
      Err(Error::Allocation {
        size: 1000 + HEADER_SIZE + 63
      })
    );
    assert_eq!(alloc.raw().allocations(), 0);
  }

  #[test]
  fn test_calloc_zeroes_usable_bytes() {
    let alloc = counting(AllocatorConfig::default());

    // Dirty the heap first so zeroing is observable.
    let dirty = alloc.malloc(4000).unwrap();
    unsafe {
      ptr::write_bytes(dirty.as_ptr(), 0xFF, 4000);
      alloc.free(dirty.as_ptr());
    }

    let p = alloc.calloc(250, 16).unwrap();
    assert!(is_aligned(p.as_ptr() as usize, 64));
    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 4000) };
    assert!(bytes.iter().all(|&b| b == 0));
    assert_eq!(unsafe { alloc.usable_size(p.as_ptr()) }, 4000);

    unsafe { alloc.free(p.as_ptr()) };
    assert_eq!(alloc.raw().live_blocks(), 0);
  }

  #[test]
  fn test_calloc_overflow() {
    let alloc = counting(AllocatorConfig::default());

    assert_eq!(alloc.calloc(usize::MAX / 2, 3), Err(Error::Overflow));
    assert_eq!(alloc.calloc(1 << 40, 1 << 40), Err(Error::Overflow));
    assert_eq!(alloc.raw().allocations(), 0);
  }

  #[test]
  fn test_realloc_null_is_malloc() {
    let alloc = counting(AllocatorConfig::default());

    let p = unsafe { alloc.realloc(ptr::null_mut(), 128) }.unwrap();
    assert!(is_aligned(p.as_ptr() as usize, 64));
    assert_eq!(alloc.raw().allocations(), 1);
    unsafe { alloc.free(p.as_ptr()) };
  }

  #[test]
  fn test_realloc_copy_grow_and_shrink() {
    let alloc = counting(AllocatorConfig::new().with_resize_in_place_min(None));

    let p = alloc.malloc(300).unwrap();
    fill(p, 300);

    let grown = unsafe { alloc.realloc(p.as_ptr(), 5000) }.unwrap();
    assert!(is_aligned(grown.as_ptr() as usize, 64));
    check(grown, 300);
    assert_eq!(unsafe { alloc.usable_size(grown.as_ptr()) }, 5000);
    assert_eq!(alloc.raw().live_blocks(), 1);

    fill(grown, 5000);
    let shrunk = unsafe { alloc.realloc(grown.as_ptr(), 100) }.unwrap();
    assert!(is_aligned(shrunk.as_ptr() as usize, 64));
    check(shrunk, 100);
    assert_eq!(alloc.raw().live_blocks(), 1);

    unsafe { alloc.free(shrunk.as_ptr()) };
    assert_eq!(alloc.raw().live_bytes(), 0);
    assert_eq!(alloc.raw().allocations(), 3);
    assert_eq!(alloc.raw().frees(), 3);
  }

  #[test]
  fn test_realloc_failure_keeps_old_block() {
    for config in [
      AllocatorConfig::new().with_resize_in_place_min(None),
      AllocatorConfig::new().with_resize_in_place_min(Some(0)),
    ] {
      let alloc = counting(config);
      let p = alloc.malloc(500).unwrap();
      fill(p, 500);
      alloc.raw().fail_requests_over(1000);

      let result = unsafe { alloc.realloc(p.as_ptr(), 4000) };
      assert!(matches!(result, Err(Error::Allocation { .. })));
      check(p, 500);
      assert_eq!(unsafe { alloc.usable_size(p.as_ptr()) }, 500);

      let overflow = unsafe { alloc.realloc(p.as_ptr(), usize::MAX) };
      assert_eq!(overflow, Err(Error::Overflow));
      check(p, 500);

      unsafe { alloc.free(p.as_ptr()) };
      assert_eq!(alloc.raw().live_blocks(), 0);
    }
  }

  #[test]
  fn test_realloc_in_place_preserves_payload() {
    let alloc = counting(AllocatorConfig::new().with_resize_in_place_min(Some(0)));
    let mut rng = StdRng::seed_from_u64(7);

    let mut size = 64;
    let mut p = alloc.malloc(size).unwrap();
    fill(p, size);

    for _ in 0..100 {
      let new_size = rng.random_range(0..300_000);
      p = unsafe { alloc.realloc(p.as_ptr(), new_size) }.unwrap();
      assert!(is_aligned(p.as_ptr() as usize, 64));
      check(p, size.min(new_size));
      assert_eq!(unsafe { alloc.usable_size(p.as_ptr()) }, new_size);

      size = new_size;
      fill(p, size);
      assert_eq!(alloc.raw().live_blocks(), 1);
    }

    unsafe { alloc.free(p.as_ptr()) };
    assert_eq!(alloc.raw().live_blocks(), 0);
  }

  #[test]
  fn test_realloc_below_threshold_copies() {
    let alloc = counting(AllocatorConfig::new().with_resize_in_place_min(Some(1 << 20)));

    let p = alloc.malloc(1000).unwrap();
    let q = unsafe { alloc.realloc(p.as_ptr(), 2000) }.unwrap();
    assert_eq!(alloc.raw().allocations(), 2);

    unsafe { alloc.free(q.as_ptr()) };
  }

  #[test]
  fn test_realloc_shrink_below_threshold_resizes() {
    let alloc = counting(AllocatorConfig::new().with_resize_in_place_min(Some(1 << 20)));

    let p = alloc.malloc(4000).unwrap();
    fill(p, 4000);
    let q = unsafe { alloc.realloc(p.as_ptr(), 1000) }.unwrap();
    assert!(is_aligned(q.as_ptr() as usize, 64));
    check(q, 1000);
    assert_eq!(unsafe { alloc.usable_size(q.as_ptr()) }, 1000);
    assert_eq!(alloc.raw().allocations(), 1);
    assert_eq!(alloc.raw().live_bytes(), 1000 + HEADER_SIZE + 63);

    unsafe { alloc.free(q.as_ptr()) };
    assert_eq!(alloc.raw().live_blocks(), 0);
  }

  #[test]
  fn test_rejects_invalid_alignment() {
    let result = AlignedAllocator::with_config(
      CountingAlloc::default(),
      AllocatorConfig::new().with_alignment(24),
    );
    assert!(matches!(result, Err(Error::InvalidAlignment { alignment: 24, .. })));
  }
}
