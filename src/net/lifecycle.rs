//! Single-flight request lifecycle.
//!
//! A `RequestLifecycle` owns at most one outstanding request. Issuing a new
//! one cancels the previous one first, and every request carries a deadline.
//! Timeout, supersede and abort all go through the same cancellation token,
//! so the caller sees one uniform `FetchError::Cancelled` outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{CancelReason, FetchError};
use super::transport::Transport;
use super::types::{Request, Response};

/// Deadline applied when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Cancellation token plus the first reason it was cancelled for.
#[derive(Clone)]
struct CancelHandle {
  token: CancellationToken,
  reason: Arc<OnceLock<CancelReason>>,
}

impl CancelHandle {
  fn new() -> Self {
    Self {
      token: CancellationToken::new(),
      reason: Arc::new(OnceLock::new()),
    }
  }

  fn cancel(&self, reason: CancelReason) {
    let _ = self.reason.set(reason);
    self.token.cancel();
  }

  fn reason(&self) -> CancelReason {
    self.reason.get().copied().unwrap_or(CancelReason::Aborted)
  }
}

struct InFlight {
  id: u64,
  cancel: CancelHandle,
}

/// Clears the in-flight slot when the request future finishes or is dropped.
/// A dropped (never released) request is cancelled.
struct InFlightGuard<'a> {
  slot: &'a Mutex<Option<InFlight>>,
  id: u64,
  released: bool,
}

impl InFlightGuard<'_> {
  /// Give up the slot. Returns false if a superseding request or an abort
  /// took it first; those cancel under the same lock, so the cancel reason
  /// is already recorded.
  fn release(&mut self) -> bool {
    self.released = true;
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|f| f.id == self.id) {
      slot.take();
      true
    } else {
      false
    }
  }
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|f| f.id == self.id) {
      if let Some(in_flight) = slot.take() {
        in_flight.cancel.cancel(CancelReason::Aborted);
      }
    }
  }
}

/// Issues requests one at a time with mandatory cancellation and timeout.
///
/// Meant to be owned by a single calling context (a view, a form, a
/// command). Dropping the manager aborts whatever is still outstanding.
pub struct RequestLifecycle<T: Transport + ?Sized> {
  transport: Arc<T>,
  timeout: Duration,
  current: Mutex<Option<InFlight>>,
  next_id: AtomicU64,
}

impl<T: Transport + ?Sized> RequestLifecycle<T> {
  pub fn new(transport: Arc<T>) -> Self {
    Self {
      transport,
      timeout: DEFAULT_TIMEOUT,
      current: Mutex::new(None),
      next_id: AtomicU64::new(1),
    }
  }

  /// Change the default deadline for requests issued by this manager.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn lock(&self) -> MutexGuard<'_, Option<InFlight>> {
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Issue a request with the manager's default deadline.
  pub async fn issue(&self, request: Request) -> Result<Response, FetchError> {
    self.issue_with_timeout(request, self.timeout).await
  }

  /// Issue a request, cancelling any request still outstanding on this
  /// manager before the new one starts.
  pub async fn issue_with_timeout(
    &self,
    request: Request,
    timeout: Duration,
  ) -> Result<Response, FetchError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let cancel = CancelHandle::new();

    {
      let mut slot = self.lock();
      if let Some(previous) = slot.replace(InFlight {
        id,
        cancel: cancel.clone(),
      }) {
        debug!(superseded = previous.id, id, "cancelling superseded request");
        previous.cancel.cancel(CancelReason::Superseded);
      }
    }

    let mut guard = InFlightGuard {
      slot: &self.current,
      id,
      released: false,
    };

    debug!(id, method = %request.method, url = %request.url, "issuing request");

    let outcome = tokio::select! {
      biased;
      _ = cancel.token.cancelled() => Err(FetchError::Cancelled { reason: cancel.reason() }),
      _ = tokio::time::sleep(timeout) => {
        cancel.cancel(CancelReason::TimedOut);
        Err(FetchError::Cancelled { reason: cancel.reason() })
      }
      result = self.transport.fetch(request) => result,
    };
    // Displaced after the network answered but before the slot was released
    let still_current = guard.release();
    let outcome = match outcome {
      Ok(_) if !still_current => Err(FetchError::Cancelled {
        reason: cancel.reason(),
      }),
      other => other,
    };

    match outcome {
      Ok(response) if response.ok() => Ok(response),
      Ok(response) => Err(FetchError::Status {
        status: response.status,
        retry_after: response.retry_after_secs(),
      }),
      Err(e) => {
        if e.is_cancelled() {
          debug!(id, "request cancelled: {}", e);
        } else {
          warn!(id, "request failed: {}", e);
        }
        Err(e)
      }
    }
  }

  /// Cancel the outstanding request, if any.
  pub fn abort(&self) {
    if let Some(in_flight) = self.lock().take() {
      debug!(id = in_flight.id, "aborting request");
      in_flight.cancel.cancel(CancelReason::Aborted);
    }
  }

  /// Whether a request is currently outstanding.
  pub fn is_in_flight(&self) -> bool {
    self.lock().is_some()
  }

  /// Token of the outstanding request, for downstream work that should stop
  /// when the request is cancelled.
  pub fn cancellation_token(&self) -> Option<CancellationToken> {
    self.lock().as_ref().map(|f| f.cancel.token.clone())
  }
}

impl<T: Transport + ?Sized> Drop for RequestLifecycle<T> {
  fn drop(&mut self) {
    self.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{url, ScriptedTransport};
  use std::pin::pin;
  use tokio::time::Instant;

  fn manager(transport: &Arc<ScriptedTransport>) -> RequestLifecycle<ScriptedTransport> {
    RequestLifecycle::new(Arc::clone(transport))
  }

  #[tokio::test(start_paused = true)]
  async fn test_issue_returns_success_response() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/api/save", 200, "{}");

    let response = manager(&transport)
      .issue(Request::get(url("/api/save")))
      .await
      .unwrap();
    assert_eq!(response.status, 200);
  }

  #[tokio::test(start_paused = true)]
  async fn test_non_success_status_is_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/api/missing", 404, "not found");

    let err = manager(&transport)
      .issue(Request::get(url("/api/missing")))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      FetchError::Status {
        status: 404,
        retry_after: None
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_rate_limit_carries_retry_after() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond_with(
      "/api/generate",
      Response::new(429, "slow down").with_header("Retry-After", "7"),
    );

    let err = manager(&transport)
      .issue(Request::get(url("/api/generate")))
      .await
      .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.retry_after(), Some(7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_transport_failure_is_network_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail("/api/save");
    let lifecycle = manager(&transport);

    let err = lifecycle
      .issue(Request::get(url("/api/save")))
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
    assert!(!lifecycle.is_in_flight());
  }

  #[tokio::test(start_paused = true)]
  async fn test_superseded_request_settles_cancelled() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.delay("/api/first", Duration::from_millis(100), 200, "first");
    transport.delay("/api/second", Duration::from_millis(100), 200, "second");
    let lifecycle = Arc::new(manager(&transport));

    let first = tokio::spawn({
      let lifecycle = Arc::clone(&lifecycle);
      async move { lifecycle.issue(Request::get(url("/api/first"))).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(lifecycle.is_in_flight());

    let second = lifecycle.issue(Request::get(url("/api/second"))).await;
    assert_eq!(second.unwrap().body, b"second");

    let first = first.await.unwrap();
    assert_eq!(
      first.unwrap_err(),
      FetchError::Cancelled {
        reason: CancelReason::Superseded
      }
    );
    assert!(!lifecycle.is_in_flight());
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_response_settles_as_timeout_at_deadline() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.delay("/api/slow", Duration::from_millis(30_001), 200, "late");

    let started = Instant::now();
    let err = manager(&transport)
      .issue(Request::get(url("/api/slow")))
      .await
      .unwrap_err();

    assert_eq!(
      err,
      FetchError::Cancelled {
        reason: CancelReason::TimedOut
      }
    );
    assert!(started.elapsed() <= DEFAULT_TIMEOUT);
  }

  #[tokio::test(start_paused = true)]
  async fn test_custom_timeout() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.hang("/api/hang");

    let lifecycle = manager(&transport).with_timeout(Duration::from_secs(2));
    let started = Instant::now();
    let err = lifecycle
      .issue(Request::get(url("/api/hang")))
      .await
      .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(started.elapsed(), Duration::from_secs(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_abort_cancels_outstanding_request() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.hang("/api/hang");
    let lifecycle = Arc::new(manager(&transport));

    let pending = tokio::spawn({
      let lifecycle = Arc::clone(&lifecycle);
      async move { lifecycle.issue(Request::get(url("/api/hang"))).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    lifecycle.abort();
    assert_eq!(
      pending.await.unwrap().unwrap_err(),
      FetchError::Cancelled {
        reason: CancelReason::Aborted
      }
    );

    // Nothing outstanding: no-op
    lifecycle.abort();
    assert!(!lifecycle.is_in_flight());
  }

  /// Aborts its owning lifecycle from inside `fetch`, then answers 200
  struct AbortsWhileAnswering {
    hook: OnceLock<Box<dyn Fn() + Send + Sync>>,
  }

  #[async_trait::async_trait]
  impl Transport for AbortsWhileAnswering {
    async fn fetch(&self, _request: Request) -> Result<Response, FetchError> {
      if let Some(hook) = self.hook.get() {
        hook();
      }
      Ok(Response::new(200, "too late"))
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_response_racing_an_abort_settles_cancelled() {
    let transport = Arc::new(AbortsWhileAnswering {
      hook: OnceLock::new(),
    });
    let lifecycle = Arc::new(RequestLifecycle::new(Arc::clone(&transport)));
    let weak = Arc::downgrade(&lifecycle);
    let _ = transport.hook.set(Box::new(move || {
      if let Some(lifecycle) = weak.upgrade() {
        lifecycle.abort();
      }
    }));

    let err = lifecycle
      .issue(Request::get(url("/api/save")))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      FetchError::Cancelled {
        reason: CancelReason::Aborted
      }
    );
    assert!(!lifecycle.is_in_flight());
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_pending_request_cancels_its_token() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.hang("/api/hang");
    let lifecycle = manager(&transport);

    let token = {
      let mut request = pin!(lifecycle.issue(Request::get(url("/api/hang"))));
      tokio::select! {
        _ = &mut request => panic!("request should still be pending"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
      }
      lifecycle.cancellation_token().unwrap()
    };

    assert!(token.is_cancelled());
    assert!(!lifecycle.is_in_flight());
  }
}
