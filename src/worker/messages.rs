//! Messages exchanged between the engine and open application contexts.

use serde::{Deserialize, Serialize};

/// Message sent to the engine by an application context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
  /// Activate the waiting generation now
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

/// Message broadcast by the engine to every open context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// A new generation took control
  #[serde(rename = "SW_ACTIVATED")]
  Activated { version: String },
}
