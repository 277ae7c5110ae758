//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::key::RequestKey;
use crate::net::Response;

/// Storage for named cache partitions holding responses keyed by request
/// identity. Writes replace the whole entry (last writer wins).
pub trait PartitionStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of all existing partitions.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Store a response. Partitions are only created by `open_partition`: a
  /// write into a partition that no longer exists is dropped and returns
  /// false.
  fn put(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Look up a response.
  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// Durable string slots, one value per key (like browser local storage).
pub trait DurableStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  /// Replace the value stored under `key`.
  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;
}

/// A response replayed from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result served straight from cache.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a result for data made up locally because nothing else was available.
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache without waiting on the network
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Network unavailable and nothing cached
  Synthesized,
}
