//! Database layer for AgriSync

mod collection_repository;
mod connection;
mod migrations;
mod operation_repository;

pub use collection_repository::{CollectionRepository, SqliteCollectionRepository};
pub use connection::Database;
pub use operation_repository::{OperationRepository, SqliteOperationRepository};
