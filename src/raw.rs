use std::{
  collections::HashMap,
  ptr,
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
};

/// An allocator without alignment guarantees beyond the platform default.
///
/// # Safety
///
/// Implementors must return either null or a pointer to at least `size`
/// writable bytes that stays valid until passed to `free` (or `realloc`) on
/// the same allocator.
pub unsafe trait RawAlloc {
  /// `true` if [`RawAlloc::realloc`] actually resizes.
  const RESIZES: bool = false;

  unsafe fn malloc(
    &self,
    size: usize,
  ) -> *mut u8;

  unsafe fn free(
    &self,
    ptr: *mut u8,
  );

  /// Resizes `ptr` to `size` bytes, preserving the common prefix. On failure
  /// returns null and leaves `ptr` untouched.
  ///
  /// Only called when `RESIZES` is `true`.
  unsafe fn realloc(
    &self,
    _ptr: *mut u8,
    _size: usize,
  ) -> *mut u8 {
    ptr::null_mut()
  }
}

/// The C runtime heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAlloc;

unsafe impl RawAlloc for LibcAlloc {
  const RESIZES: bool = true;

  unsafe fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    // malloc(0) may legally return null.
    unsafe { libc::malloc(size.max(1)) as *mut u8 }
  }

  unsafe fn free(
    &self,
    ptr: *mut u8,
  ) {
    unsafe { libc::free(ptr as *mut libc::c_void) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { libc::realloc(ptr as *mut libc::c_void, size.max(1)) as *mut u8 }
  }
}

/// Wraps another allocator and keeps an exact ledger of live blocks.
///
/// Used as the leak/double-free oracle in tests and diagnostics. Requests
/// larger than the configured limit fail as if the heap were exhausted.
#[derive(Debug)]
pub struct CountingAlloc<A = LibcAlloc> {
  inner: A,
  allocations: AtomicUsize,
  frees: AtomicUsize,
  limit: AtomicUsize,
  live: Mutex<Option<HashMap<usize, usize>>>,
}

impl<A: RawAlloc> CountingAlloc<A> {
  pub const fn new(inner: A) -> Self {
    Self {
      inner,
      allocations: AtomicUsize::new(0),
      frees: AtomicUsize::new(0),
      limit: AtomicUsize::new(usize::MAX),
      live: Mutex::new(None),
    }
  }

  /// Makes every request above `limit` bytes fail.
  pub fn fail_requests_over(
    &self,
    limit: usize,
  ) {
    self.limit.store(limit, Ordering::SeqCst);
  }

  pub fn allocations(&self) -> usize {
    self.allocations.load(Ordering::SeqCst)
  }

  pub fn frees(&self) -> usize {
    self.frees.load(Ordering::SeqCst)
  }

  pub fn live_blocks(&self) -> usize {
    self.with_live(|live| live.len())
  }

  pub fn live_bytes(&self) -> usize {
    self.with_live(|live| live.values().sum())
  }

  fn with_live<R>(
    &self,
    f: impl FnOnce(&mut HashMap<usize, usize>) -> R,
  ) -> R {
    let mut guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
    f(guard.get_or_insert_with(HashMap::new))
  }

  fn over_limit(
    &self,
    size: usize,
  ) -> bool {
    size > self.limit.load(Ordering::SeqCst)
  }
}

impl Default for CountingAlloc<LibcAlloc> {
  fn default() -> Self {
    Self::new(LibcAlloc)
  }
}

unsafe impl<A: RawAlloc> RawAlloc for CountingAlloc<A> {
  const RESIZES: bool = A::RESIZES;

  unsafe fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    if self.over_limit(size) {
      return ptr::null_mut();
    }

    let ptr = unsafe { self.inner.malloc(size) };
    if !ptr.is_null() {
      self.allocations.fetch_add(1, Ordering::SeqCst);
      self.with_live(|live| live.insert(ptr as usize, size));
    }
    ptr
  }

  unsafe fn free(
    &self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    // Reached from the extern "C" shims, where a panic aborts the process.
    // Unknown blocks (double or foreign frees) are reported and never passed
    // on to the inner allocator.
    let known = self.with_live(|live| live.remove(&(ptr as usize)));
    if known.is_none() {
      log::error!("free of unknown block {ptr:?}");
      if cfg!(debug_assertions) {
        panic!("free of unknown block {ptr:?}");
      }
      return;
    }
    self.frees.fetch_add(1, Ordering::SeqCst);
    unsafe { self.inner.free(ptr) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if self.over_limit(size) {
      return ptr::null_mut();
    }

    let new_ptr = unsafe { self.inner.realloc(ptr, size) };
    if !new_ptr.is_null() {
      self.with_live(|live| {
        live.remove(&(ptr as usize));
        live.insert(new_ptr as usize, size);
      });
    }
    new_ptr
  }
}
