/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two and the addition must not overflow; use
/// [`checked_align_up`] for sizes that come from callers.
///
/// # Examples
///
/// ```rust
/// use aligned_alloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(64, 64), 64);
/// assert_eq!(align_to!(65, 64), 128);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Returns `true` if `addr` is a multiple of `align` (a power of two).
#[inline]
pub const fn is_aligned(
  addr: usize,
  align: usize,
) -> bool {
  addr & (align - 1) == 0
}

/// Rounds `value` up to a multiple of `align`, or `None` on overflow.
#[inline]
pub const fn checked_align_up(
  value: usize,
  align: usize,
) -> Option<usize> {
  match value.checked_add(align - 1) {
    Some(v) => Some(v & !(align - 1)),
    None => None,
  }
}

/// Bytes to reserve from the underlying allocator so that `size` usable
/// bytes, a header of `header` bytes, and the worst-case alignment slack
/// all fit: `size + header + (align - 1)`.
#[inline]
pub const fn checked_padded_size(
  size: usize,
  header: usize,
  align: usize,
) -> Option<usize> {
  match size.checked_add(header) {
    Some(v) => v.checked_add(align - 1),
    None => None,
  }
}
