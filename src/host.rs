use std::{
  fmt,
  ptr::NonNull,
  slice,
  sync::atomic::{AtomicPtr, Ordering},
};

use crate::{
  error::{Error, Result},
  handler::{DEFAULT_HANDLER, MemHandler},
};

/// The allocator-policy capability of a host array library.
///
/// Hosts tag every buffer with the handler that allocated it, so switching
/// the current handler never affects live buffers.
pub trait Host {
  /// The handler used for the next buffer allocation.
  fn handler(&self) -> &'static MemHandler;

  /// Installs `handler` (or the host default for `None`) and returns the
  /// handler it replaced. The swap is atomic with respect to allocations.
  fn set_handler(
    &self,
    handler: Option<&'static MemHandler>,
  ) -> Result<&'static MemHandler>;
}

/// In-process host: an atomically swappable current handler plus
/// [`HostBuffer`]s that remember who allocated them.
pub struct LocalHost {
  current: AtomicPtr<MemHandler>,
  default: &'static MemHandler,
}

impl LocalHost {
  pub const fn new() -> Self {
    Self::with_default(&DEFAULT_HANDLER)
  }

  pub const fn with_default(default: &'static MemHandler) -> Self {
    Self {
      current: AtomicPtr::new(default as *const MemHandler as *mut MemHandler),
      default,
    }
  }

  /// The process-wide host driven by [`enable`](crate::enable) and
  /// [`disable`](crate::disable).
  pub fn global() -> &'static LocalHost {
    &GLOBAL_HOST
  }

  pub fn default_handler(&self) -> &'static MemHandler {
    self.default
  }

  /// Allocates an uninitialised buffer of `len` bytes with the current
  /// handler.
  pub fn alloc_buffer(
    &self,
    len: usize,
  ) -> Result<HostBuffer> {
    let handler = self.handler();
    let ptr = unsafe { handler.malloc(len.max(1)) };
    HostBuffer::from_raw(handler, ptr, len)
  }

  /// Allocates a zeroed buffer of `count * elem_size` bytes with the
  /// current handler.
  pub fn zeroed_buffer(
    &self,
    count: usize,
    elem_size: usize,
  ) -> Result<HostBuffer> {
    let len = count.checked_mul(elem_size).ok_or(Error::Overflow)?;
    let handler = self.handler();
    let ptr = unsafe { handler.calloc(count.max(1), elem_size.max(1)) };
    HostBuffer::from_raw(handler, ptr, len)
  }
}

static GLOBAL_HOST: LocalHost = LocalHost::new();

impl Default for LocalHost {
  fn default() -> Self {
    Self::new()
  }
}

impl Host for LocalHost {
  fn handler(&self) -> &'static MemHandler {
    unsafe { &*self.current.load(Ordering::Acquire) }
  }

  fn set_handler(
    &self,
    handler: Option<&'static MemHandler>,
  ) -> Result<&'static MemHandler> {
    let handler = handler.unwrap_or(self.default);
    let previous = self.current.swap(
      handler as *const MemHandler as *mut MemHandler,
      Ordering::AcqRel,
    );
    log::debug!("host handler {:?} -> {:?}", unsafe { &*previous }.name(), handler.name());
    Ok(unsafe { &*previous })
  }
}

impl fmt::Debug for LocalHost {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("LocalHost")
      .field("current", &self.handler().name())
      .field("default", &self.default.name())
      .finish()
  }
}

/// A host-owned data buffer. Resizes and releases always go through the
/// handler that allocated it.
pub struct HostBuffer {
  handler: &'static MemHandler,
  ptr: NonNull<u8>,
  len: usize,
}

unsafe impl Send for HostBuffer {}

impl HostBuffer {
  fn from_raw(
    handler: &'static MemHandler,
    ptr: *mut u8,
    len: usize,
  ) -> Result<Self> {
    match NonNull::new(ptr) {
      Some(ptr) => Ok(Self { handler, ptr, len }),
      None => Err(Error::Allocation { size: len }),
    }
  }

  pub fn handler(&self) -> &'static MemHandler {
    self.handler
  }

  pub fn as_ptr(&self) -> *const u8 {
    self.ptr.as_ptr()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_slice(&self) -> &[u8] {
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }

  /// Resizes through the owning handler. On failure the buffer is unchanged.
  pub fn resize(
    &mut self,
    new_len: usize,
  ) -> Result<()> {
    let ptr = unsafe { self.handler.realloc(self.ptr.as_ptr(), new_len.max(1)) };
    self.ptr = NonNull::new(ptr).ok_or(Error::Allocation { size: new_len })?;
    self.len = new_len;
    Ok(())
  }
}

impl Drop for HostBuffer {
  fn drop(&mut self) {
    unsafe { self.handler.free(self.ptr.as_ptr(), self.len) }
  }
}

impl fmt::Debug for HostBuffer {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("HostBuffer")
      .field("handler", &self.handler.name())
      .field("ptr", &self.ptr)
      .field("len", &self.len)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::ptr;

  use super::*;
  use crate::{align::is_aligned, handler::ALIGNED_HANDLER};

  #[test]
  fn test_starts_with_default() {
    let host = LocalHost::new();
    assert!(ptr::eq(host.handler(), &DEFAULT_HANDLER));
  }

  #[test]
  fn test_global_is_one_instance() {
    assert!(ptr::eq(LocalHost::global(), LocalHost::global()));
  }

  #[test]
  fn test_swap_returns_previous() {
    let host = LocalHost::new();

    let prev = host.set_handler(Some(&ALIGNED_HANDLER)).unwrap();
    assert!(ptr::eq(prev, &DEFAULT_HANDLER));
    assert!(ptr::eq(host.handler(), &ALIGNED_HANDLER));

    let prev = host.set_handler(None).unwrap();
    assert!(ptr::eq(prev, &ALIGNED_HANDLER));
    assert!(ptr::eq(host.handler(), &DEFAULT_HANDLER));
  }

  #[test]
  fn test_buffer_keeps_its_handler() {
    let host = LocalHost::new();
    host.set_handler(Some(&ALIGNED_HANDLER)).unwrap();

    let mut buf = host.alloc_buffer(1000).unwrap();
    assert!(is_aligned(buf.as_ptr() as usize, 64));
    buf.as_mut_slice().fill(9);

    host.set_handler(None).unwrap();
    assert!(ptr::eq(buf.handler(), &ALIGNED_HANDLER));

    buf.resize(5000).unwrap();
    assert!(is_aligned(buf.as_ptr() as usize, 64));
    assert!(buf.as_slice()[..1000].iter().all(|&b| b == 9));
    drop(buf);

    let plain = host.alloc_buffer(10).unwrap();
    assert!(ptr::eq(plain.handler(), &DEFAULT_HANDLER));
  }

  #[test]
  fn test_zeroed_buffer() {
    let host = LocalHost::new();
    host.set_handler(Some(&ALIGNED_HANDLER)).unwrap();

    let buf = host.zeroed_buffer(125, 8).unwrap();
    assert_eq!(buf.len(), 1000);
    assert!(buf.as_slice().iter().all(|&b| b == 0));
    assert!(matches!(
      host.zeroed_buffer(usize::MAX, 2),
      Err(Error::Overflow)
    ));
  }

  #[test]
  fn test_allocation_failure() {
    let host = LocalHost::new();
    host.set_handler(Some(&ALIGNED_HANDLER)).unwrap();

    let err = host.alloc_buffer(usize::MAX).unwrap_err();
    assert!(err.is_out_of_memory());
  }
}
