use std::mem;

/// Bookkeeping stored immediately before every pointer handed out by
/// [`AlignedAllocator`](crate::AlignedAllocator).
///
/// ```text
///   raw                         aligned = raw + offset
///   │                           │
///   ▼                           ▼
///   ┌───────────┬──────────────┬───────────────────────┬─────────┐
///   │   slack   │    Header    │   size usable bytes   │  slack  │
///   │           │ raw │ size   │                       │         │
///   └───────────┴──────────────┴───────────────────────┴─────────┘
///               ◄─HEADER_SIZE─►
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  /// Pointer returned by the underlying allocator.
  pub raw: *mut u8,
  /// Usable size requested by the caller.
  pub size: usize,
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();
pub const HEADER_ALIGN: usize = mem::align_of::<Header>();

impl Header {
  pub const fn new(
    raw: *mut u8,
    size: usize,
  ) -> Self {
    Self { raw, size }
  }

  /// Stores `self` in the `HEADER_SIZE` bytes preceding `aligned`.
  ///
  /// # Safety
  ///
  /// `aligned - HEADER_SIZE .. aligned` must lie inside a live block owned by
  /// the engine and `aligned` must be a multiple of `HEADER_ALIGN`.
  pub unsafe fn write_before(
    self,
    aligned: *mut u8,
  ) {
    unsafe { Self::location(aligned).write(self) }
  }

  /// Loads the header preceding `aligned`.
  ///
  /// # Safety
  ///
  /// `aligned` must have been returned by the engine and not freed since.
  pub unsafe fn read_before(aligned: *const u8) -> Self {
    unsafe { Self::location(aligned as *mut u8).read() }
  }

  /// Distance between the raw block start and the aligned pointer.
  pub fn offset_of(
    &self,
    aligned: *const u8,
  ) -> usize {
    aligned as usize - self.raw as usize
  }

  unsafe fn location(aligned: *mut u8) -> *mut Header {
    unsafe { aligned.sub(HEADER_SIZE) as *mut Header }
  }
}
