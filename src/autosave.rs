//! Single-slot autosave with read-time expiry.
//!
//! Only one autosave exists at a time; writing replaces it. Whether a record
//! may still be resumed is computed when it is read, so an expired record
//! stays in storage untouched and a different window needs no migration.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::DurableStore;

/// Durable key holding the autosave record
pub const AUTOSAVE_KEY: &str = "outpost.autosave";

/// Default resume window
pub const EXPIRATION_MINUTES: i64 = 10;

/// Persisted as `{ "state": <opaque>, "timestamp": <epoch ms> }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveRecord {
  pub state: serde_json::Value,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub timestamp: DateTime<Utc>,
}

impl AutosaveRecord {
  pub fn new(state: serde_json::Value, now: DateTime<Utc>) -> Self {
    Self {
      state,
      timestamp: now,
    }
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.timestamp
  }
}

pub fn expiration_window() -> Duration {
  Duration::minutes(EXPIRATION_MINUTES)
}

/// Whether `record` is young enough to offer a resume (10 minute window).
pub fn is_valid(record: &AutosaveRecord, now: DateTime<Utc>) -> bool {
  is_valid_within(record, now, expiration_window())
}

pub fn is_valid_within(record: &AutosaveRecord, now: DateTime<Utc>, window: Duration) -> bool {
  record.age(now) <= window
}

/// Age in whole minutes, rounded to nearest.
pub fn age_minutes(record: &AutosaveRecord, now: DateTime<Utc>) -> i64 {
  (record.age(now).num_milliseconds() as f64 / 60_000.0).round() as i64
}

/// The autosave slot in durable storage.
pub struct AutosaveSlot {
  store: Arc<dyn DurableStore>,
  window: Duration,
}

impl AutosaveSlot {
  pub fn new(store: Arc<dyn DurableStore>) -> Self {
    Self {
      store,
      window: expiration_window(),
    }
  }

  pub fn with_expiration(mut self, window: Duration) -> Self {
    self.window = window;
    self
  }

  /// Replace the autosave with `state`, stamped at `now`.
  pub fn save(&self, state: serde_json::Value, now: DateTime<Utc>) -> Result<AutosaveRecord> {
    let record = AutosaveRecord::new(state, now);
    let json =
      serde_json::to_string(&record).map_err(|e| eyre!("Failed to serialize autosave: {}", e))?;
    self.store.set_item(AUTOSAVE_KEY, &json)?;
    debug!("autosave written");
    Ok(record)
  }

  /// The stored record regardless of age. Unreadable records count as absent.
  pub fn load(&self) -> Result<Option<AutosaveRecord>> {
    let Some(json) = self.store.get_item(AUTOSAVE_KEY)? else {
      return Ok(None);
    };

    match serde_json::from_str(&json) {
      Ok(record) => Ok(Some(record)),
      Err(e) => {
        warn!("ignoring unreadable autosave: {}", e);
        Ok(None)
      }
    }
  }

  /// The record if it can still be resumed at `now`. Expired records are
  /// reported as absent but left in place.
  pub fn load_resumable(&self, now: DateTime<Utc>) -> Result<Option<AutosaveRecord>> {
    Ok(
      self
        .load()?
        .filter(|record| is_valid_within(record, now, self.window)),
    )
  }

  /// Discard the autosave (after resuming or dismissing it).
  pub fn clear(&self) -> Result<()> {
    self.store.remove_item(AUTOSAVE_KEY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use chrono::TimeZone;
  use serde_json::json;

  fn created() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
  }

  fn slot() -> (Arc<SqliteStorage>, AutosaveSlot) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let slot = AutosaveSlot::new(storage.clone());
    (storage, slot)
  }

  #[test]
  fn test_validity_boundary_at_ten_minutes() {
    let record = AutosaveRecord::new(json!({}), created());
    assert!(is_valid(&record, created() + Duration::milliseconds(599_999)));
    assert!(is_valid(&record, created() + Duration::milliseconds(600_000)));
    assert!(!is_valid(&record, created() + Duration::milliseconds(600_001)));
  }

  #[test]
  fn test_age_minutes_rounds() {
    let record = AutosaveRecord::new(json!({}), created());
    assert_eq!(age_minutes(&record, created()), 0);
    assert_eq!(age_minutes(&record, created() + Duration::seconds(29)), 0);
    assert_eq!(age_minutes(&record, created() + Duration::seconds(30)), 1);
    assert_eq!(age_minutes(&record, created() + Duration::seconds(9 * 60 + 40)), 10);
  }

  #[test]
  fn test_storage_format() {
    let (storage, slot) = slot();
    slot.save(json!({ "hp": 12 }), created()).unwrap();

    let raw: serde_json::Value =
      serde_json::from_str(&storage.get_item(AUTOSAVE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(
      raw,
      json!({ "state": { "hp": 12 }, "timestamp": created().timestamp_millis() })
    );
  }

  #[test]
  fn test_save_replaces_previous_record() {
    let (_storage, slot) = slot();
    slot.save(json!({ "turn": 1 }), created()).unwrap();
    slot
      .save(json!({ "turn": 2 }), created() + Duration::minutes(1))
      .unwrap();

    let record = slot.load().unwrap().unwrap();
    assert_eq!(record.state, json!({ "turn": 2 }));
    assert_eq!(record.timestamp, created() + Duration::minutes(1));
  }

  #[test]
  fn test_expired_record_is_hidden_but_kept() {
    let (_storage, slot) = slot();
    slot.save(json!({ "turn": 7 }), created()).unwrap();

    let later = created() + Duration::minutes(11);
    assert!(slot.load_resumable(later).unwrap().is_none());
    assert!(slot.load().unwrap().is_some());

    let longer = AutosaveSlot::new(slot.store.clone()).with_expiration(Duration::minutes(15));
    assert!(longer.load_resumable(later).unwrap().is_some());
  }

  #[test]
  fn test_clear_and_corrupt_records() {
    let (storage, slot) = slot();
    slot.save(json!(null), created()).unwrap();
    slot.clear().unwrap();
    assert!(slot.load().unwrap().is_none());

    storage.set_item(AUTOSAVE_KEY, "not json").unwrap();
    assert!(slot.load().unwrap().is_none());
  }
}
