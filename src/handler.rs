//! C-compatible allocator tables in the layout NumPy expects from a data
//! memory handler (`PyDataMem_Handler`).

use std::{
  ffi::{CStr, c_char, c_void},
  fmt, ptr, slice,
};

use crate::{
  aligned::AlignedAllocator,
  raw::{LibcAlloc, RawAlloc},
};

pub const HANDLER_NAME_LEN: usize = 127;
pub const HANDLER_VERSION: u8 = 1;
pub const ALIGNED_HANDLER_NAME: &str = "np_aligned_alloc_mem_handler";
pub const DEFAULT_HANDLER_NAME: &str = "default_allocator";

pub type MallocFn = unsafe extern "C" fn(ctx: *mut c_void, size: usize) -> *mut c_void;
pub type CallocFn =
  unsafe extern "C" fn(ctx: *mut c_void, nelem: usize, elsize: usize) -> *mut c_void;
pub type ReallocFn =
  unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut c_void, new_size: usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut c_void, size: usize);

/// The four allocator entry points plus their shared context.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MemAllocator {
  pub ctx: *mut c_void,
  pub malloc: MallocFn,
  pub calloc: CallocFn,
  pub realloc: ReallocFn,
  pub free: FreeFn,
}

/// A named allocator policy.
#[repr(C)]
pub struct MemHandler {
  pub name: [c_char; HANDLER_NAME_LEN],
  pub version: u8,
  pub allocator: MemAllocator,
}

// Handlers are immutable tables; `ctx` points at a `Sync` engine or is null.
unsafe impl Sync for MemHandler {}
unsafe impl Send for MemHandler {}

impl MemHandler {
  pub const fn new(
    name: &str,
    allocator: MemAllocator,
  ) -> Self {
    Self {
      name: encode_name(name),
      version: HANDLER_VERSION,
      allocator,
    }
  }

  /// A handler whose callbacks forward to `engine`.
  pub const fn for_engine<A: RawAlloc + Sync>(
    name: &str,
    engine: &'static AlignedAllocator<A>,
  ) -> Self {
    Self::new(
      name,
      MemAllocator {
        ctx: engine as *const AlignedAllocator<A> as *mut c_void,
        malloc: engine_malloc::<A>,
        calloc: engine_calloc::<A>,
        realloc: engine_realloc::<A>,
        free: engine_free::<A>,
      },
    )
  }

  /// The name up to its NUL, or `"<invalid>"` if the array has no NUL or
  /// is not UTF-8.
  pub fn name(&self) -> &str {
    // c_char and u8 have the same size and alignment.
    let bytes =
      unsafe { slice::from_raw_parts(self.name.as_ptr() as *const u8, HANDLER_NAME_LEN) };
    CStr::from_bytes_until_nul(bytes)
      .ok()
      .and_then(|name| name.to_str().ok())
      .unwrap_or("<invalid>")
  }

  /// # Safety
  ///
  /// Same contract as the C `malloc` this handler stands in for.
  pub unsafe fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { (self.allocator.malloc)(self.allocator.ctx, size) as *mut u8 }
  }

  /// # Safety
  ///
  /// Same contract as the C `calloc` this handler stands in for.
  pub unsafe fn calloc(
    &self,
    nelem: usize,
    elsize: usize,
  ) -> *mut u8 {
    unsafe { (self.allocator.calloc)(self.allocator.ctx, nelem, elsize) as *mut u8 }
  }

  /// # Safety
  ///
  /// `ptr` must be null or have been allocated by this handler.
  pub unsafe fn realloc(
    &self,
    ptr: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    unsafe { (self.allocator.realloc)(self.allocator.ctx, ptr as *mut c_void, new_size) as *mut u8 }
  }

  /// # Safety
  ///
  /// `ptr` must be null or have been allocated by this handler.
  pub unsafe fn free(
    &self,
    ptr: *mut u8,
    size: usize,
  ) {
    unsafe { (self.allocator.free)(self.allocator.ctx, ptr as *mut c_void, size) }
  }
}

impl fmt::Debug for MemHandler {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("MemHandler")
      .field("name", &self.name())
      .field("version", &self.version)
      .field("ctx", &self.allocator.ctx)
      .finish()
  }
}

impl PartialEq for MemHandler {
  fn eq(
    &self,
    other: &Self,
  ) -> bool {
    ptr::eq(self, other)
  }
}

impl Eq for MemHandler {}

const fn encode_name(name: &str) -> [c_char; HANDLER_NAME_LEN] {
  let bytes = name.as_bytes();
  assert!(bytes.len() < HANDLER_NAME_LEN, "handler name too long");

  let mut out = [0 as c_char; HANDLER_NAME_LEN];
  let mut i = 0;
  while i < bytes.len() {
    out[i] = bytes[i] as c_char;
    i += 1;
  }
  out
}

unsafe fn engine<'a, A: RawAlloc>(ctx: *mut c_void) -> &'a AlignedAllocator<A> {
  unsafe { &*(ctx as *const AlignedAllocator<A>) }
}

unsafe extern "C" fn engine_malloc<A: RawAlloc>(
  ctx: *mut c_void,
  size: usize,
) -> *mut c_void {
  match unsafe { engine::<A>(ctx) }.malloc(size) {
    Ok(p) => p.as_ptr() as *mut c_void,
    Err(_) => ptr::null_mut(),
  }
}

unsafe extern "C" fn engine_calloc<A: RawAlloc>(
  ctx: *mut c_void,
  nelem: usize,
  elsize: usize,
) -> *mut c_void {
  match unsafe { engine::<A>(ctx) }.calloc(nelem, elsize) {
    Ok(p) => p.as_ptr() as *mut c_void,
    Err(_) => ptr::null_mut(),
  }
}

unsafe extern "C" fn engine_realloc<A: RawAlloc>(
  ctx: *mut c_void,
  ptr: *mut c_void,
  new_size: usize,
) -> *mut c_void {
  match unsafe { engine::<A>(ctx).realloc(ptr as *mut u8, new_size) } {
    Ok(p) => p.as_ptr() as *mut c_void,
    Err(_) => ptr::null_mut(),
  }
}

unsafe extern "C" fn engine_free<A: RawAlloc>(
  ctx: *mut c_void,
  ptr: *mut c_void,
  _size: usize,
) {
  // The header, not the host, knows the real size.
  unsafe { engine::<A>(ctx).free(ptr as *mut u8) }
}

unsafe extern "C" fn default_malloc(
  _ctx: *mut c_void,
  size: usize,
) -> *mut c_void {
  unsafe { libc::malloc(size) }
}

unsafe extern "C" fn default_calloc(
  _ctx: *mut c_void,
  nelem: usize,
  elsize: usize,
) -> *mut c_void {
  unsafe { libc::calloc(nelem, elsize) }
}

unsafe extern "C" fn default_realloc(
  _ctx: *mut c_void,
  ptr: *mut c_void,
  new_size: usize,
) -> *mut c_void {
  unsafe { libc::realloc(ptr, new_size) }
}

unsafe extern "C" fn default_free(
  _ctx: *mut c_void,
  ptr: *mut c_void,
  _size: usize,
) {
  unsafe { libc::free(ptr) }
}

/// Engine behind [`ALIGNED_HANDLER`].
pub static ALIGNED_ENGINE: AlignedAllocator<LibcAlloc> = AlignedAllocator::libc();

/// 64-byte aligned policy over the C heap.
pub static ALIGNED_HANDLER: MemHandler = MemHandler::for_engine(ALIGNED_HANDLER_NAME, &ALIGNED_ENGINE);

/// The host's built-in policy: plain libc with no alignment guarantee.
pub static DEFAULT_HANDLER: MemHandler = MemHandler::new(
  DEFAULT_HANDLER_NAME,
  MemAllocator {
    ctx: ptr::null_mut(),
    malloc: default_malloc,
    calloc: default_calloc,
    realloc: default_realloc,
    free: default_free,
  },
);
