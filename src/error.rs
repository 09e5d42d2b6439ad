use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// The underlying allocator returned null.
  #[error("underlying allocator failed to provide {size} bytes")]
  Allocation { size: usize },

  /// A size or count computation would overflow `usize`.
  #[error("allocation size overflows usize")]
  Overflow,

  #[error("alignment {alignment} must be a power of two and at least {minimum}")]
  InvalidAlignment { alignment: usize, minimum: usize },

  #[error("aligned allocation policy is already enabled")]
  AlreadyEnabled,

  #[error("aligned allocation policy is not enabled")]
  NotEnabled,

  /// `disable` was handed a different host than `enable`.
  #[error("aligned allocation policy was enabled on another host")]
  ForeignHost,

  /// Someone else installed a handler over ours since `enable`.
  #[error("host handler was replaced by {current}")]
  HandlerReplaced { current: String },

  /// The host refused to change its allocator policy.
  #[error("host rejected handler change: {0}")]
  Host(String),
}

impl Error {
  pub fn host(message: impl Into<String>) -> Error {
    Error::Host(message.into())
  }

  /// `Allocation` and `Overflow` look the same at the host boundary.
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, Error::Allocation { .. } | Error::Overflow)
  }

  /// Enable/disable called in the wrong state.
  pub fn is_policy_state(&self) -> bool {
    matches!(
      self,
      Error::AlreadyEnabled
        | Error::NotEnabled
        | Error::ForeignHost
        | Error::HandlerReplaced { .. }
    )
  }
}
