//! Registry of open application contexts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

use super::messages::ClientMessage;

pub type ClientId = u64;

struct ClientEntry {
  tx: mpsc::UnboundedSender<ClientMessage>,
  /// Generation controlling this client, if any
  controller: Option<String>,
}

/// Open application contexts, each with a message channel.
#[derive(Default)]
pub struct ClientRegistry {
  clients: Mutex<HashMap<ClientId, ClientEntry>>,
  next_id: AtomicU64,
}

impl ClientRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientEntry>> {
    self.clients.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a new context, optionally already controlled by `controller`.
  pub fn open(self: &Arc<Self>, controller: Option<String>) -> ClientHandle {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    self.lock().insert(id, ClientEntry { tx, controller });

    ClientHandle {
      id,
      rx,
      registry: Arc::downgrade(self),
    }
  }

  /// Make `generation` the controller of every open client.
  /// Returns the number of clients claimed.
  pub fn claim(&self, generation: &str) -> usize {
    let mut clients = self.lock();
    for entry in clients.values_mut() {
      entry.controller = Some(generation.to_string());
    }
    clients.len()
  }

  /// Send `message` to every open client, dropping clients whose receiving
  /// side is gone. Returns the number of clients reached.
  pub fn broadcast(&self, message: &ClientMessage) -> usize {
    let mut clients = self.lock();
    clients.retain(|_, entry| entry.tx.send(message.clone()).is_ok());
    clients.len()
  }

  pub fn controller_of(&self, id: ClientId) -> Option<String> {
    self.lock().get(&id).and_then(|entry| entry.controller.clone())
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn close(&self, id: ClientId) {
    self.lock().remove(&id);
  }
}

/// An open application context. Dropping it closes the context.
pub struct ClientHandle {
  id: ClientId,
  rx: mpsc::UnboundedReceiver<ClientMessage>,
  registry: Weak<ClientRegistry>,
}

impl ClientHandle {
  pub fn id(&self) -> ClientId {
    self.id
  }

  /// Wait for the next message from the engine.
  pub async fn recv(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  /// Next already-delivered message, if any.
  pub fn try_recv(&mut self) -> Option<ClientMessage> {
    self.rx.try_recv().ok()
  }

  /// Generation currently controlling this context.
  pub fn controller(&self) -> Option<String> {
    self
      .registry
      .upgrade()
      .and_then(|registry| registry.controller_of(self.id))
  }
}

impl Drop for ClientHandle {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.close(self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_sets_controller_for_all_clients() {
    let registry = ClientRegistry::new();
    let a = registry.open(None);
    let b = registry.open(Some("v1".to_string()));

    assert_eq!(registry.claim("v2"), 2);
    assert_eq!(a.controller().as_deref(), Some("v2"));
    assert_eq!(b.controller().as_deref(), Some("v2"));
  }

  #[test]
  fn test_broadcast_reaches_open_clients() {
    let registry = ClientRegistry::new();
    let mut a = registry.open(None);
    let mut b = registry.open(None);
    let msg = ClientMessage::Activated {
      version: "v3".to_string(),
    };

    assert_eq!(registry.broadcast(&msg), 2);
    assert_eq!(a.try_recv(), Some(msg.clone()));
    assert_eq!(b.try_recv(), Some(msg));
    assert_eq!(a.try_recv(), None);
  }

  #[test]
  fn test_dropped_handle_closes_client() {
    let registry = ClientRegistry::new();
    let a = registry.open(None);
    let _b = registry.open(None);
    assert_eq!(registry.len(), 2);

    drop(a);
    assert_eq!(registry.len(), 1);
  }
}
