//! Typed request outcomes.
//!
//! Callers can tell the failure classes apart:
//! - `Network`: the transport could not reach the server
//! - `Cancelled`: superseded, aborted or past its deadline
//! - `Status`: the server answered with a non-2xx status

use std::fmt;

/// Why an in-flight request was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
  /// A newer request from the same manager replaced it
  Superseded,
  /// `abort()` was called or the owner went away
  Aborted,
  /// The deadline elapsed before the network settled
  TimedOut,
}

impl fmt::Display for CancelReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      CancelReason::Superseded => "superseded",
      CancelReason::Aborted => "aborted",
      CancelReason::TimedOut => "timed out",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  /// Network unreachable, connection reset, DNS failure...
  #[error("network unavailable: {0}")]
  Network(String),

  /// Timeouts surface here too, distinguished only by the reason
  #[error("request cancelled ({reason})")]
  Cancelled { reason: CancelReason },

  #[error("request failed with status {status}")]
  Status {
    status: u16,
    /// Server-declared wait, from `Retry-After`
    retry_after: Option<u64>,
  },
}

impl FetchError {
  pub fn network(message: impl Into<String>) -> Self {
    Self::Network(message.into())
  }

  /// Cancellation-driven failures, which callers usually keep out of
  /// user-facing error display.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchError::Cancelled { .. })
  }

  pub fn is_rate_limited(&self) -> bool {
    matches!(self, FetchError::Status { status: 429, .. })
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn retry_after(&self) -> Option<u64> {
    match self {
      FetchError::Status { retry_after, .. } => *retry_after,
      _ => None,
    }
  }
}
