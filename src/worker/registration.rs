//! Process-wide host for interception engines.
//!
//! Holds the engine controlling clients plus at most one incoming engine
//! that is installing or waiting. Requests are routed through the active
//! engine; before any generation is active they go straight to the network.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::clients::{ClientHandle, ClientRegistry};
use super::engine::{EngineConfig, InterceptionEngine};
use super::lifecycle::WorkerState;
use super::messages::WorkerMessage;
use super::sync::{SyncHandler, SyncRegistry, SyncReport};
use crate::cache::{CacheResult, DurableStore, PartitionStore};
use crate::net::{FetchError, Request, Response, Transport};

/// Durable key remembering which generation finished activating
pub const ACTIVE_GENERATION_KEY: &str = "outpost.active_generation";

pub struct Registration {
  store: Arc<dyn PartitionStore>,
  durable: Arc<dyn DurableStore>,
  transport: Arc<dyn Transport>,
  clients: Arc<ClientRegistry>,
  sync: SyncRegistry,
  active: RwLock<Option<Arc<InterceptionEngine>>>,
  incoming: Mutex<Option<Arc<InterceptionEngine>>>,
}

impl Registration {
  pub fn new(
    store: Arc<dyn PartitionStore>,
    durable: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      store,
      durable,
      transport,
      clients: ClientRegistry::new(),
      sync: SyncRegistry::new(),
      active: RwLock::new(None),
      incoming: Mutex::new(None),
    }
  }

  fn incoming(&self) -> MutexGuard<'_, Option<Arc<InterceptionEngine>>> {
    self.incoming.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The engine currently controlling clients
  pub fn active(&self) -> Option<Arc<InterceptionEngine>> {
    self
      .active
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn active_generation(&self) -> Option<String> {
    self.active().map(|engine| engine.generation().to_string())
  }

  /// State of the engine installing or waiting to take over, if any
  pub fn incoming_state(&self) -> Option<WorkerState> {
    self.incoming().as_ref().map(|engine| engine.state())
  }

  pub fn clients(&self) -> &Arc<ClientRegistry> {
    &self.clients
  }

  /// Open an application context, controlled by the active generation.
  pub fn open_client(&self) -> ClientHandle {
    self.clients.open(self.active_generation())
  }

  /// Register the engine for `config`'s generation.
  ///
  /// If that generation already finished activating in an earlier run it is
  /// restored as active without reinstalling. Otherwise it is installed and
  /// either activated right away (skip-waiting signalled) or left waiting.
  pub async fn register(&self, config: EngineConfig) -> Result<WorkerState> {
    let generation = config.namespace.generation().to_string();

    if self.active_generation().as_deref() == Some(generation.as_str()) {
      debug!(generation = %generation, "generation already active");
      return Ok(WorkerState::Activated);
    }

    if self.stored_generation().as_deref() == Some(generation.as_str()) {
      let engine = Arc::new(InterceptionEngine::restored(
        config,
        Arc::clone(&self.store),
        Arc::clone(&self.transport),
      ));
      self.clients.claim(engine.generation());
      self.set_active(engine);
      info!(generation = %generation, "restored active generation");
      return Ok(WorkerState::Activated);
    }

    let engine = Arc::new(InterceptionEngine::new(
      config,
      Arc::clone(&self.store),
      Arc::clone(&self.transport),
    ));
    let replaced = self.incoming().replace(Arc::clone(&engine));
    if let Some(replaced) = replaced {
      info!(generation = replaced.generation(), "discarding superseded incoming generation");
    }

    if let Err(e) = engine.install().await {
      self.take_incoming(&engine);
      return Err(e);
    }

    if engine.skip_waiting_requested() {
      self.activate_incoming(&engine)?;
    }
    Ok(engine.state())
  }

  /// Handle a message from an application context.
  pub fn post_message(&self, message: WorkerMessage) -> Result<()> {
    match message {
      WorkerMessage::SkipWaiting => {
        let incoming = self.incoming().clone();
        let Some(engine) = incoming else {
          debug!("SKIP_WAITING with no incoming generation");
          return Ok(());
        };

        engine.skip_waiting();
        // Still installing: `register` activates once install finishes
        if engine.state() == WorkerState::Waiting {
          self.activate_incoming(&engine)?;
        }
        Ok(())
      }
    }
  }

  fn take_incoming(&self, engine: &Arc<InterceptionEngine>) -> bool {
    let mut incoming = self.incoming();
    if incoming.as_ref().is_some_and(|e| Arc::ptr_eq(e, engine)) {
      incoming.take();
      true
    } else {
      false
    }
  }

  fn activate_incoming(&self, engine: &Arc<InterceptionEngine>) -> Result<()> {
    if !self.take_incoming(engine) {
      return Ok(());
    }

    engine.activate(&self.clients)?;
    self.set_active(Arc::clone(engine));

    if let Err(e) = self
      .durable
      .set_item(ACTIVE_GENERATION_KEY, engine.generation())
    {
      warn!("failed to persist active generation: {}", e);
    }
    Ok(())
  }

  fn set_active(&self, engine: Arc<InterceptionEngine>) {
    *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(engine);
  }

  fn stored_generation(&self) -> Option<String> {
    match self.durable.get_item(ACTIVE_GENERATION_KEY) {
      Ok(generation) => generation,
      Err(e) => {
        warn!("failed to read active generation: {}", e);
        None
      }
    }
  }

  /// Install the routine run when `tag` fires.
  pub fn set_sync_handler(&self, tag: &str, handler: Arc<dyn SyncHandler>) {
    self.sync.set_handler(tag, handler);
  }

  /// Ask for `tag` to run once connectivity is restored.
  pub fn register_sync(&self, tag: &str) {
    self.sync.register(tag);
  }

  pub fn pending_syncs(&self) -> Vec<String> {
    self.sync.pending()
  }

  /// Connectivity came back: run pending deferred syncs.
  pub async fn on_reconnect(&self) -> SyncReport {
    self.sync.run_pending().await
  }

  /// Route a request through the active engine, or straight to the network
  /// when no generation is active yet.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    match self.active() {
      Some(engine) => engine.fetch(request).await,
      None => self
        .transport
        .fetch(request)
        .await
        .map(CacheResult::from_network),
    }
  }
}

#[async_trait]
impl Transport for Registration {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    Registration::fetch(self, request)
      .await
      .map(|result| result.data)
  }
}
