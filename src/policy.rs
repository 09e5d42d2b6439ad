use std::{
  ptr,
  sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
  error::{Error, Result},
  handler::{ALIGNED_HANDLER, MemHandler},
  host::{Host, LocalHost},
};

/// What the binding has installed, if anything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
  #[default]
  Inactive,
  /// Holds the handler that was current before `enable` and the address of
  /// the host it was installed in.
  Active {
    previous: &'static MemHandler,
    host: usize,
  },
}

impl PolicyState {
  pub fn is_active(&self) -> bool {
    matches!(self, PolicyState::Active { .. })
  }
}

/// Installs one handler in a host and later restores whatever it replaced.
///
/// ```text
///            enable(host)
///   Inactive ────────────► Active { previous, host }
///      ▲                        │
///      └────────────────────────┘
///            disable(host)
/// ```
///
/// `enable` while active, or while the host already runs this handler, and
/// `disable` while inactive are rejected and leave the state alone. So is a
/// `disable` on a different host, or after someone else replaced the handler
/// on top of ours. Transitions are serialised by a mutex; the host swap itself
/// must be atomic for concurrent allocations.
#[derive(Debug)]
pub struct PolicyBinding {
  handler: &'static MemHandler,
  state: Mutex<PolicyState>,
}

impl PolicyBinding {
  pub const fn new(handler: &'static MemHandler) -> Self {
    Self {
      handler,
      state: Mutex::new(PolicyState::Inactive),
    }
  }

  pub fn handler(&self) -> &'static MemHandler {
    self.handler
  }

  pub fn is_active(&self) -> bool {
    self.lock().is_active()
  }

  pub fn state(&self) -> PolicyState {
    *self.lock()
  }

  pub fn enable<H: Host + ?Sized>(
    &self,
    host: &H,
  ) -> Result<()> {
    let mut state = self.lock();
    if state.is_active() || ptr::eq(host.handler(), self.handler) {
      return Err(Error::AlreadyEnabled);
    }

    let previous = host.set_handler(Some(self.handler))?;
    *state = PolicyState::Active {
      previous,
      host: host_id(host),
    };
    log::debug!("enabled {} (was {})", self.handler.name(), previous.name());
    Ok(())
  }

  pub fn disable<H: Host + ?Sized>(
    &self,
    host: &H,
  ) -> Result<()> {
    let mut state = self.lock();
    let PolicyState::Active { previous, host: id } = *state else {
      return Err(Error::NotEnabled);
    };
    if id != host_id(host) {
      return Err(Error::ForeignHost);
    }

    let current = host.handler();
    if !ptr::eq(current, self.handler) {
      return Err(Error::HandlerReplaced {
        current: current.name().to_owned(),
      });
    }

    host.set_handler(Some(previous))?;
    *state = PolicyState::Inactive;
    log::debug!("disabled {}, restored {}", self.handler.name(), previous.name());
    Ok(())
  }

  // State is written only after the host call succeeded, so a poisoned
  // guard still holds a consistent value.
  fn lock(&self) -> MutexGuard<'_, PolicyState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

fn host_id<H: Host + ?Sized>(host: &H) -> usize {
  host as *const H as *const () as usize
}

static ALIGNED_POLICY: PolicyBinding = PolicyBinding::new(&ALIGNED_HANDLER);

/// Routes future buffer allocations of the process host
/// ([`LocalHost::global`]) through the 64-byte aligned allocator.
pub fn enable() -> Result<()> {
  ALIGNED_POLICY.enable(LocalHost::global())
}

/// Restores the handler the process host used before [`enable`].
pub fn disable() -> Result<()> {
  ALIGNED_POLICY.disable(LocalHost::global())
}

pub fn is_active() -> bool {
  ALIGNED_POLICY.is_active()
}
