//! Async service wrappers over the local store.

mod database;

pub use database::DatabaseService;
