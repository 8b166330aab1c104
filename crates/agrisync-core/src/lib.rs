//! agrisync-core - Core library for AgriSync
//!
//! This crate contains the collection models, the local `SQLite` store, the
//! outgoing operation queue and the sync engine that replays it against the
//! server. Every write lands locally first; delivery is best effort and
//! failures are parked for an operator instead of being dropped.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
mod util;

pub use config::{ConfigError, SyncSettings};
pub use error::{Error, Result};
pub use models::{
    Collection, CollectionId, CollectionStatus, NewCollection, OperationId, OutgoingOperation,
    SyncStatus,
};
pub use services::DatabaseService;
pub use state::SyncState;
pub use sync::{SyncEngine, SyncError};
