//! Cache layer that orchestrates fetch strategies over the partitions.

use std::sync::Arc;
use tracing::{debug, warn};

use super::key::RequestKey;
use super::traits::{CacheResult, CachedResponse, PartitionStore};
use crate::net::{FetchError, Request, Response, Transport};

/// What network-first does when the network fails and nothing is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissPolicy {
  /// Return the transport error to the caller
  Propagate,
  /// Answer with a synthesized `503 Offline` response
  OfflineResponse,
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the interception engine and the transport.
/// Cache reads that fail are treated as misses and cache writes are
/// best-effort: storage trouble never fails a response.
pub struct CacheLayer {
  store: Arc<dyn PartitionStore>,
  transport: Arc<dyn Transport>,
}

impl CacheLayer {
  pub fn new(store: Arc<dyn PartitionStore>, transport: Arc<dyn Transport>) -> Self {
    Self { store, transport }
  }

  pub fn store(&self) -> &Arc<dyn PartitionStore> {
    &self.store
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Try the network
  /// 2. On success, mirror 2xx responses into `mirror_into` (if any)
  /// 3. On failure, return the first cached copy found in `fallback`
  /// 4. Nothing cached: apply `on_miss`
  pub async fn network_first(
    &self,
    request: Request,
    mirror_into: Option<&str>,
    fallback: &[&str],
    on_miss: MissPolicy,
  ) -> Result<CacheResult<Response>, FetchError> {
    let key = RequestKey::for_request(&request);

    match self.transport.fetch(request).await {
      Ok(response) => {
        if let Some(partition) = mirror_into {
          self.put(partition, &key, &response);
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        if let Some(cached) = fallback
          .iter()
          .find_map(|partition| self.lookup(partition, &key))
        {
          debug!(request = %key.description(), "network failed, serving cached copy");
          return Ok(CacheResult::offline(cached.response, cached.cached_at));
        }

        match on_miss {
          MissPolicy::Propagate => Err(err),
          MissPolicy::OfflineResponse => {
            debug!(request = %key.description(), "network failed, nothing cached");
            Ok(CacheResult::synthesized(Response::offline()))
          }
        }
      }
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// A hit is returned immediately while a detached task refreshes the
  /// entry for next time; refresh failures are dropped. A miss goes to the
  /// network and the response is stored.
  pub async fn cache_first(
    &self,
    request: Request,
    partition: &str,
  ) -> Result<CacheResult<Response>, FetchError> {
    let key = RequestKey::for_request(&request);

    if let Some(cached) = self.lookup(partition, &key) {
      self.revalidate(request, partition.to_string(), key);
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = self.transport.fetch(request).await?;
    self.put(partition, &key, &response);
    Ok(CacheResult::from_network(response))
  }

  fn revalidate(&self, request: Request, partition: String, key: RequestKey) {
    let store = Arc::clone(&self.store);
    let transport = Arc::clone(&self.transport);

    tokio::spawn(async move {
      match transport.fetch(request).await {
        Ok(response) => put_best_effort(store.as_ref(), &partition, &key, &response),
        Err(e) => debug!(request = %key.description(), "background refresh failed: {}", e),
      }
    });
  }

  fn lookup(&self, partition: &str, key: &RequestKey) -> Option<CachedResponse> {
    match self.store.get(partition, key) {
      Ok(cached) => cached,
      Err(e) => {
        warn!(partition, request = %key.description(), "cache read failed: {}", e);
        None
      }
    }
  }

  fn put(&self, partition: &str, key: &RequestKey, response: &Response) {
    put_best_effort(self.store.as_ref(), partition, key, response);
  }
}

/// Only successful responses are cached; write failures are logged and dropped.
fn put_best_effort(
  store: &dyn PartitionStore,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) {
  if !response.ok() {
    return;
  }
  match store.put(partition, key, response) {
    Ok(true) => {}
    Ok(false) => debug!(partition, request = %key.description(), "partition retired, write dropped"),
    Err(e) => warn!(partition, request = %key.description(), "cache write failed: {}", e),
  }
}
