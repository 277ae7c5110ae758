//! Offline resilience and synchronization layer.
//!
//! - `cache` + `worker`: versioned response caching behind an interception engine
//! - `net`: transport seam and the single-flight request lifecycle
//! - `retry`: server-declared backoff countdown
//! - `autosave`: single-slot, staleness-bounded autosave
//! - `connectivity`: online/offline tracking with a "just reconnected" signal

pub mod autosave;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod net;
pub mod retry;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
