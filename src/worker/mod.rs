//! Network interception engine and its process-wide registration.
//!
//! An engine owns one cache generation. It moves through
//! installing → waiting → activating → activated, and the registration
//! decides when a waiting generation takes over from the active one.

mod clients;
mod engine;
mod lifecycle;
mod messages;
mod registration;
mod sync;

pub use clients::{ClientHandle, ClientId, ClientRegistry};
pub use engine::{EngineConfig, InterceptionEngine, DEFAULT_PRECACHE};
pub use lifecycle::{InvalidTransition, Lifecycle, WorkerState};
pub use messages::{ClientMessage, WorkerMessage};
pub use registration::{Registration, ACTIVE_GENERATION_KEY};
pub use sync::{SyncHandler, SyncRegistry, SyncReport, SYNC_GAME_SAVES};
