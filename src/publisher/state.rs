// src/publisher/state.rs

use std::sync::atomic::{AtomicU8, Ordering};

/// Connection lifecycle: `Init → Connected → Disconnected → Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ConnState {
  Init = 0,
  Connected = 1,
  Disconnected = 2,
}

impl ConnState {
  fn from_u8(v: u8) -> ConnState {
    match v {
      0 => ConnState::Init,
      1 => ConnState::Connected,
      _ => ConnState::Disconnected,
    }
  }
}

/// Atomic cell holding the current [`ConnState`].
///
/// `transition` is a compare-and-set: `Init→Connected` is won by exactly one
/// connect attempt, `Connected→Disconnected` by exactly one close per
/// connection cycle.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
  pub fn new() -> Self {
    Self(AtomicU8::new(ConnState::Init as u8))
  }

  pub fn load(&self) -> ConnState {
    ConnState::from_u8(self.0.load(Ordering::Acquire))
  }

  /// Attempts `from → to`; returns whether this caller won the transition.
  pub fn transition(&self, from: ConnState, to: ConnState) -> bool {
    self
      .0
      .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub fn store(&self, state: ConnState) {
    self.0.store(state as u8, Ordering::Release);
  }
}
