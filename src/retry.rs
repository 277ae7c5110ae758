//! Countdown-gated retry after a server-declared wait.
//!
//! The latest `Retry-After` always wins: a new hint replaces the running
//! countdown instead of adding to it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

const TICK: Duration = Duration::from_secs(1);

/// Seconds left before a retry is permitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryWindow {
  remaining: u64,
}

impl RetryWindow {
  pub fn new(retry_after_secs: u64) -> Self {
    Self {
      remaining: retry_after_secs,
    }
  }

  pub fn remaining(&self) -> u64 {
    self.remaining
  }

  pub fn can_retry(&self) -> bool {
    self.remaining == 0
  }

  /// One second passed. Returns whether retrying is now permitted.
  pub fn tick(&mut self) -> bool {
    self.remaining = self.remaining.saturating_sub(1);
    self.can_retry()
  }

  pub fn reset(&mut self, retry_after_secs: u64) {
    self.remaining = retry_after_secs;
  }
}

/// Drives a `RetryWindow` with a once-per-second ticker.
pub struct RetryCoordinator {
  window: Arc<watch::Sender<RetryWindow>>,
  ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RetryCoordinator {
  fn default() -> Self {
    Self::new()
  }
}

impl RetryCoordinator {
  /// A coordinator with nothing to wait for
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(RetryWindow::default());
    Self {
      window: Arc::new(tx),
      ticker: Mutex::new(None),
    }
  }

  /// Start (or restart) the countdown from `retry_after_secs`.
  pub fn set_retry_after(&self, retry_after_secs: u64) {
    let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = ticker.take() {
      previous.abort();
    }

    debug!(retry_after_secs, "rate limited, starting countdown");
    self
      .window
      .send_replace(RetryWindow::new(retry_after_secs));
    if retry_after_secs == 0 {
      return;
    }

    let window = Arc::clone(&self.window);
    *ticker = Some(tokio::spawn(async move {
      let mut interval = interval_at(Instant::now() + TICK, TICK);
      loop {
        interval.tick().await;
        let mut ready = false;
        window.send_modify(|w| ready = w.tick());
        if ready {
          break;
        }
      }
    }));
  }

  pub fn window(&self) -> RetryWindow {
    *self.window.borrow()
  }

  pub fn remaining(&self) -> u64 {
    self.window().remaining()
  }

  pub fn can_retry(&self) -> bool {
    self.window().can_retry()
  }

  /// Live countdown, for rendering
  pub fn subscribe(&self) -> watch::Receiver<RetryWindow> {
    self.window.subscribe()
  }

  /// Run `action` only if retrying is permitted right now.
  pub fn try_retry<F, R>(&self, action: F) -> Option<R>
  where
    F: FnOnce() -> R,
  {
    if self.can_retry() {
      Some(action())
    } else {
      None
    }
  }

  /// Wait until the countdown reaches zero.
  pub async fn ready(&self) {
    let mut rx = self.subscribe();
    // The sender lives in self, so this only ends once the window opens
    let _ = rx.wait_for(RetryWindow::can_retry).await;
  }

  /// Explanation shown next to the disabled retry control.
  pub fn message(&self) -> String {
    match self.remaining() {
      0 => "You can try again now.".to_string(),
      1 => "Too many requests. Please wait 1 second before trying again.".to_string(),
      n => format!(
        "Too many requests. Please wait {} seconds before trying again.",
        n
      ),
    }
  }
}

impl Drop for RetryCoordinator {
  fn drop(&mut self) {
    let ticker = self.ticker.get_mut().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = ticker.take() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::sleep;

  #[test]
  fn test_window_opens_on_fifth_tick() {
    let mut window = RetryWindow::new(5);
    for _ in 0..4 {
      assert!(!window.can_retry());
      assert!(!window.tick());
    }
    assert!(!window.can_retry());
    assert!(window.tick());
    assert!(window.can_retry());

    // Stays open
    assert!(window.tick());
    assert_eq!(window.remaining(), 0);
  }

  #[test]
  fn test_reset_replaces_instead_of_accumulating() {
    let mut window = RetryWindow::new(5);
    window.tick();
    window.reset(3);
    assert_eq!(window.remaining(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_coordinator_counts_down() {
    let coordinator = RetryCoordinator::new();
    assert!(coordinator.can_retry());

    coordinator.set_retry_after(5);
    assert!(!coordinator.can_retry());
    assert_eq!(coordinator.try_retry(|| "sent"), None);

    sleep(Duration::from_millis(4_500)).await;
    assert_eq!(coordinator.remaining(), 1);
    assert!(!coordinator.can_retry());

    sleep(Duration::from_secs(1)).await;
    assert!(coordinator.can_retry());
    assert_eq!(coordinator.try_retry(|| "sent"), Some("sent"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_new_hint_restarts_countdown() {
    let coordinator = RetryCoordinator::new();
    coordinator.set_retry_after(5);
    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(coordinator.remaining(), 3);

    coordinator.set_retry_after(3);
    assert_eq!(coordinator.remaining(), 3);

    sleep(Duration::from_millis(2_600)).await;
    assert_eq!(coordinator.remaining(), 1);

    sleep(Duration::from_millis(500)).await;
    assert!(coordinator.can_retry());
  }

  #[tokio::test(start_paused = true)]
  async fn test_ready_resolves_when_window_opens() {
    let coordinator = RetryCoordinator::new();
    coordinator.set_retry_after(2);

    let started = Instant::now();
    coordinator.ready().await;
    assert_eq!(started.elapsed(), Duration::from_secs(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_message_tracks_countdown() {
    let coordinator = RetryCoordinator::new();
    coordinator.set_retry_after(2);
    assert_eq!(
      coordinator.message(),
      "Too many requests. Please wait 2 seconds before trying again."
    );

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
      coordinator.message(),
      "Too many requests. Please wait 1 second before trying again."
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(coordinator.message(), "You can try again now.");
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_wait_is_immediately_retryable() {
    let coordinator = RetryCoordinator::new();
    coordinator.set_retry_after(0);
    assert!(coordinator.can_retry());
  }
}
