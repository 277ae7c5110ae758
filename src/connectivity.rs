//! Online/offline tracking with a transient "just reconnected" flag.
//!
//! State is derived only from platform events; nothing can force it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::net::{Method, Request, Transport};

/// How long `just_reconnected` stays set after coming back online
pub const DEFAULT_RECONNECT_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
  pub online: bool,
  pub just_reconnected: bool,
}

/// Platform reachability change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  Online,
  Offline,
}

pub struct ConnectivityMonitor {
  state: Arc<watch::Sender<ConnectivityState>>,
  reconnect_window: Duration,
  /// Bumped on every transition so a stale clear timer does nothing
  epoch: Arc<AtomicU64>,
}

impl ConnectivityMonitor {
  /// Start from the platform's current reachability.
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(ConnectivityState {
      online: initially_online,
      just_reconnected: false,
    });
    Self {
      state: Arc::new(tx),
      reconnect_window: DEFAULT_RECONNECT_WINDOW,
      epoch: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn with_reconnect_window(mut self, window: Duration) -> Self {
    self.reconnect_window = window;
    self
  }

  pub fn state(&self) -> ConnectivityState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.state.subscribe()
  }

  /// Apply a platform event. Returns true when it was an offline→online
  /// transition, i.e. deferred work should sync now.
  pub fn handle(&self, event: ConnectivityEvent) -> bool {
    let online = self.state().online;

    match event {
      ConnectivityEvent::Offline if online => {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectivityState {
          online: false,
          just_reconnected: false,
        });
        info!("connection lost");
        false
      }
      ConnectivityEvent::Online if !online => {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectivityState {
          online: true,
          just_reconnected: true,
        });
        info!("connection restored");
        self.schedule_clear(epoch);
        true
      }
      _ => {
        debug!(?event, "connectivity unchanged");
        false
      }
    }
  }

  fn schedule_clear(&self, epoch: u64) {
    let state = Arc::clone(&self.state);
    let current = Arc::clone(&self.epoch);
    let window = self.reconnect_window;

    tokio::spawn(async move {
      tokio::time::sleep(window).await;
      if current.load(Ordering::SeqCst) != epoch {
        return;
      }
      state.send_if_modified(|s| {
        let changed = s.just_reconnected;
        s.just_reconnected = false;
        changed
      });
    });
  }
}

/// Polls the origin to produce connectivity events.
pub struct ReachabilityProbe {
  transport: Arc<dyn Transport>,
  target: Url,
  interval: Duration,
}

impl ReachabilityProbe {
  pub fn new(transport: Arc<dyn Transport>, target: Url, interval: Duration) -> Self {
    Self {
      transport,
      target,
      interval,
    }
  }

  /// Any HTTP answer means reachable; only transport failures or a probe
  /// slower than the interval count as offline.
  pub async fn check(&self) -> bool {
    let request = Request::new(Method::Head, self.target.clone());
    matches!(
      tokio::time::timeout(self.interval, self.transport.fetch(request)).await,
      Ok(Ok(_))
    )
  }

  /// Probe forever, sending one event per check until the receiver is gone.
  pub fn spawn(self, events: mpsc::Sender<ConnectivityEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.interval);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        let event = if self.check().await {
          ConnectivityEvent::Online
        } else {
          ConnectivityEvent::Offline
        };
        if events.send(event).await.is_err() {
          break;
        }
      }
    })
  }
}
