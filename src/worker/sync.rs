//! Deferred synchronization: tags registered while offline run once
//! connectivity returns.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Tag under which pending offline game saves are pushed
pub const SYNC_GAME_SAVES: &str = "sync-game-saves";

/// Routine run when a registered sync tag fires.
#[async_trait]
pub trait SyncHandler: Send + Sync {
  async fn sync(&self, tag: &str) -> Result<()>;
}

/// Outcome of one pass over the pending tags
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub completed: Vec<String>,
  /// Handler failed; the tag stays pending
  pub failed: Vec<String>,
  /// No handler registered; the tag stays pending
  pub unhandled: Vec<String>,
}

#[derive(Default)]
pub struct SyncRegistry {
  handlers: Mutex<HashMap<String, Arc<dyn SyncHandler>>>,
  pending: Mutex<BTreeSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install the routine for `tag`, replacing any previous one.
  pub fn set_handler(&self, tag: &str, handler: Arc<dyn SyncHandler>) {
    lock(&self.handlers).insert(tag.to_string(), handler);
  }

  /// Ask for `tag` to run at the next reconnect. Registering twice is a no-op.
  pub fn register(&self, tag: &str) {
    lock(&self.pending).insert(tag.to_string());
  }

  pub fn pending(&self) -> Vec<String> {
    lock(&self.pending).iter().cloned().collect()
  }

  /// Run the handler of every pending tag. Successful tags are cleared.
  pub async fn run_pending(&self) -> SyncReport {
    let mut report = SyncReport::default();

    for tag in self.pending() {
      let handler = lock(&self.handlers).get(&tag).cloned();
      let Some(handler) = handler else {
        warn!(tag, "sync tag fired with no handler registered");
        report.unhandled.push(tag);
        continue;
      };

      match handler.sync(&tag).await {
        Ok(()) => {
          info!(tag, "sync completed");
          lock(&self.pending).remove(&tag);
          report.completed.push(tag);
        }
        Err(e) => {
          warn!(tag, "sync failed, will retry on next reconnect: {}", e);
          report.failed.push(tag);
        }
      }
    }

    report
  }
}
