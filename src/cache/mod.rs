//! Versioned response cache used by the interception engine.
//!
//! This module provides:
//! - Named partitions (shell and API) namespaced by a cache generation
//! - Request classification into fetch policies
//! - Network-first and cache-first (with background revalidation) strategies
//! - A durable key/value slot store for small pieces of client state

mod generation;
mod key;
mod layer;
mod policy;
mod storage;
mod traits;

pub use generation::CacheNamespace;
pub use key::RequestKey;
pub use layer::{CacheLayer, MissPolicy};
pub use policy::{RequestClass, RoutePolicy, DEFAULT_ASSET_EXTENSIONS};
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, CachedResponse, DurableStore, PartitionStore};
