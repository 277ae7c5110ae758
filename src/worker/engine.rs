//! One cache generation's interception engine.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use super::clients::ClientRegistry;
use super::lifecycle::{Lifecycle, WorkerState};
use super::messages::ClientMessage;
use crate::cache::{
  CacheLayer, CacheNamespace, CacheResult, MissPolicy, PartitionStore, RequestClass, RequestKey,
  RoutePolicy,
};
use crate::net::{FetchError, Request, Response, Transport};

/// Paths precached on install when none are configured
pub const DEFAULT_PRECACHE: &[&str] = &["/", "/manifest.json"];

/// Settings for one engine generation
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub origin: Url,
  pub namespace: CacheNamespace,
  pub policy: RoutePolicy,
  /// Critical paths fetched into the shell partition on install
  pub precache: Vec<String>,
  /// Signal skip-waiting as soon as install finishes
  pub skip_waiting_on_install: bool,
}

impl EngineConfig {
  pub fn new(origin: Url, namespace: CacheNamespace) -> Self {
    let policy = RoutePolicy::for_origin(&origin);
    Self {
      origin,
      namespace,
      policy,
      precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
      skip_waiting_on_install: true,
    }
  }
}

/// Intercepts requests for one cache generation and manages that
/// generation's partitions across install and activation.
pub struct InterceptionEngine {
  config: EngineConfig,
  layer: CacheLayer,
  lifecycle: Mutex<Lifecycle>,
}

impl InterceptionEngine {
  pub fn new(
    config: EngineConfig,
    store: Arc<dyn PartitionStore>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      config,
      layer: CacheLayer::new(store, transport),
      lifecycle: Mutex::new(Lifecycle::new()),
    }
  }

  /// Engine for a generation that was activated in an earlier run.
  pub(crate) fn restored(
    config: EngineConfig,
    store: Arc<dyn PartitionStore>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      lifecycle: Mutex::new(Lifecycle::activated()),
      ..Self::new(config, store, transport)
    }
  }

  fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn generation(&self) -> &str {
    self.config.namespace.generation()
  }

  pub fn namespace(&self) -> &CacheNamespace {
    &self.config.namespace
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle().state()
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.lifecycle().skip_waiting_requested()
  }

  /// Ask to activate without waiting. Returns false once activation started.
  pub fn skip_waiting(&self) -> bool {
    self.lifecycle().request_skip_waiting()
  }

  /// Open this generation's partitions and precache the critical paths.
  ///
  /// A path that cannot be fetched is logged and skipped; only failing to
  /// open a partition aborts the install. These are the only places
  /// partitions get created, so retired generations cannot come back.
  pub async fn install(&self) -> Result<()> {
    let shell = self.config.namespace.shell();
    info!(generation = self.generation(), "installing");

    for partition in [shell.clone(), self.config.namespace.api()] {
      self
        .layer
        .store()
        .open_partition(&partition)
        .map_err(|e| eyre!("Failed to open cache {}: {}", partition, e))?;
    }

    let fetches = self.config.precache.iter().filter_map(|path| {
      let url = match self.config.origin.join(path) {
        Ok(url) => url,
        Err(e) => {
          warn!(path = %path, "skipping invalid precache path: {}", e);
          return None;
        }
      };
      let request = Request::get(url);
      let key = RequestKey::for_request(&request);
      let transport = self.layer.transport();
      Some(async move { (path, key, transport.fetch(request).await) })
    });

    for (path, key, result) in join_all(fetches).await {
      match result {
        Ok(response) if response.ok() => {
          if let Err(e) = self.layer.store().put(&shell, &key, &response) {
            warn!(path = %path, "failed to precache: {}", e);
          }
        }
        Ok(response) => warn!(path = %path, status = response.status, "failed to precache"),
        Err(e) => warn!(path = %path, "failed to precache: {}", e),
      }
    }

    let mut lifecycle = self.lifecycle();
    lifecycle.advance(WorkerState::Waiting)?;
    if self.config.skip_waiting_on_install {
      lifecycle.request_skip_waiting();
    }
    info!(generation = self.generation(), "installed");
    Ok(())
  }

  /// Delete stale partitions, then claim every client and announce the
  /// new generation. Cleanup always finishes before clients are claimed.
  pub fn activate(&self, clients: &ClientRegistry) -> Result<()> {
    self.lifecycle().advance(WorkerState::Activating)?;
    info!(generation = self.generation(), "activating");

    self.delete_stale_partitions();

    let claimed = clients.claim(self.generation());
    let notified = clients.broadcast(&ClientMessage::Activated {
      version: self.generation().to_string(),
    });

    self.lifecycle().advance(WorkerState::Activated)?;
    info!(generation = self.generation(), claimed, notified, "activated");
    Ok(())
  }

  fn delete_stale_partitions(&self) {
    let store = self.layer.store();
    let partitions = match store.partitions() {
      Ok(partitions) => partitions,
      Err(e) => {
        warn!("failed to enumerate cache partitions: {}", e);
        return;
      }
    };

    for name in partitions {
      if self.config.namespace.is_current(&name) {
        continue;
      }
      match store.delete_partition(&name) {
        Ok(_) => info!(partition = %name, "deleted stale cache"),
        Err(e) => warn!(partition = %name, "failed to delete stale cache: {}", e),
      }
    }
  }

  /// Answer an intercepted request according to its class.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    let shell = self.config.namespace.shell();
    let shell = shell.as_str();
    let api = self.config.namespace.api();
    let api = api.as_str();
    let class = self.config.policy.classify(&request);
    debug!(url = %request.url, ?class, "intercepted");

    match class {
      RequestClass::PassThrough => self
        .layer
        .transport()
        .fetch(request)
        .await
        .map(CacheResult::from_network),
      RequestClass::Navigation => {
        self
          .layer
          .network_first(request, Some(shell), &[shell], MissPolicy::OfflineResponse)
          .await
      }
      RequestClass::Api => {
        self
          .layer
          .network_first(request, Some(api), &[api], MissPolicy::Propagate)
          .await
      }
      RequestClass::StaticAsset => self.layer.cache_first(request, shell).await,
      RequestClass::Other => {
        self
          .layer
          .network_first(request, None, &[shell, api], MissPolicy::Propagate)
          .await
      }
    }
  }
}
