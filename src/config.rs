use crate::{
  error::{Error, Result},
  header::HEADER_ALIGN,
};

/// Cache-line and AVX-512 vector width.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Blocks at least this large are resized through the underlying realloc
/// instead of allocate/copy/free.
pub const DEFAULT_RESIZE_IN_PLACE_MIN: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Every pointer handed out is a multiple of this.
  pub alignment: usize,
  /// Usable size from which `realloc` tries the underlying allocator's own
  /// resize. `None` always uses allocate/copy/free.
  pub resize_in_place_min: Option<usize>,
}

impl AllocatorConfig {
  pub const fn new() -> Self {
    Self {
      alignment: DEFAULT_ALIGNMENT,
      resize_in_place_min: Some(DEFAULT_RESIZE_IN_PLACE_MIN),
    }
  }

  pub const fn with_alignment(
    mut self,
    alignment: usize,
  ) -> Self {
    self.alignment = alignment;
    self
  }

  pub const fn with_resize_in_place_min(
    mut self,
    min: Option<usize>,
  ) -> Self {
    self.resize_in_place_min = min;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if !self.alignment.is_power_of_two() || self.alignment < HEADER_ALIGN {
      return Err(Error::InvalidAlignment {
        alignment: self.alignment,
        minimum: HEADER_ALIGN,
      });
    }
    Ok(())
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self::new()
  }
}
