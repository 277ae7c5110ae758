use std::fmt;

/// Lifecycle state of an interception engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Precaching the shell
  Installing,
  /// Installed, another generation may still control clients
  Waiting,
  /// Cleaning up stale partitions and claiming clients
  Activating,
  /// Controlling clients and handling requests
  Activated,
}

impl WorkerState {
  pub fn can_transition_to(self, next: WorkerState) -> bool {
    use WorkerState::{Activated, Activating, Installing, Waiting};
    matches!(
      (self, next),
      (Installing, Waiting) | (Waiting, Activating) | (Activating, Activated)
    )
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Installing => "installing",
      WorkerState::Waiting => "waiting",
      WorkerState::Activating => "activating",
      WorkerState::Activated => "activated",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition from {from} to {to}")]
pub struct InvalidTransition {
  pub from: WorkerState,
  pub to: WorkerState,
}

/// Guarded state machine plus the pending skip-waiting signal.
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: WorkerState::Installing,
      skip_waiting: false,
    }
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  /// A lifecycle that already finished activating in an earlier run.
  pub fn activated() -> Self {
    Self {
      state: WorkerState::Activated,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn advance(&mut self, next: WorkerState) -> Result<(), InvalidTransition> {
    if !self.state.can_transition_to(next) {
      return Err(InvalidTransition {
        from: self.state,
        to: next,
      });
    }
    self.state = next;
    Ok(())
  }

  /// Record a skip-waiting request. Ignored (returns false) once
  /// activation has started.
  pub fn request_skip_waiting(&mut self) -> bool {
    match self.state {
      WorkerState::Installing | WorkerState::Waiting => {
        self.skip_waiting = true;
        true
      }
      WorkerState::Activating | WorkerState::Activated => false,
    }
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path() {
    let mut lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.state(), WorkerState::Installing);
    lifecycle.advance(WorkerState::Waiting).unwrap();
    lifecycle.advance(WorkerState::Activating).unwrap();
    lifecycle.advance(WorkerState::Activated).unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Activated);
  }

  #[test]
  fn test_transitions_are_guarded() {
    let mut lifecycle = Lifecycle::new();
    let err = lifecycle.advance(WorkerState::Activated).unwrap_err();
    assert_eq!(
      err,
      InvalidTransition {
        from: WorkerState::Installing,
        to: WorkerState::Activated
      }
    );
    assert_eq!(err.to_string(), "invalid lifecycle transition from installing to activated");

    let mut done = Lifecycle::activated();
    assert!(done.advance(WorkerState::Waiting).is_err());
  }

  #[test]
  fn test_skip_waiting_only_before_activation() {
    let mut lifecycle = Lifecycle::new();
    assert!(lifecycle.request_skip_waiting());
    assert!(lifecycle.skip_waiting_requested());

    let mut done = Lifecycle::activated();
    assert!(!done.request_skip_waiting());
    assert!(!done.skip_waiting_requested());
  }
}
