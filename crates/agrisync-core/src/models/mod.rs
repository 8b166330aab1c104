//! Data models for AgriSync

mod collection;
mod operation;
mod stats;

pub use collection::{
    Collection, CollectionId, CollectionStatus, NewCollection, SyncStatus, DEFAULT_WRITER_ID,
};
pub use operation::{FailureKind, HttpMethod, OperationId, OperationStatus, OutgoingOperation};
pub use stats::StoreStats;
