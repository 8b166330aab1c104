//! Database migrations

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::Database(format!(
            "schema version {version} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn apply(conn: &mut Connection, statements: &[&str]) -> Result<()> {
    // Dropping the transaction without commit rolls it back
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: collections and the outgoing operation queue
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Domain records, never physically deleted by the sync flow
        "CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            farmer_id TEXT NOT NULL,
            collector_id TEXT NOT NULL DEFAULT '',
            crop_type TEXT NOT NULL,
            weight_kg REAL NOT NULL CHECK (weight_kg >= 0),
            price_per_kg REAL NOT NULL CHECK (price_per_kg >= 0),
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            writer_id TEXT NOT NULL,
            last_writer_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_collections_sync_status ON collections(sync_status)",
        "CREATE INDEX IF NOT EXISTS idx_collections_farmer ON collections(farmer_id)",
        "CREATE INDEX IF NOT EXISTS idx_collections_updated ON collections(updated_at DESC)",
        // Queue rows reference collections by id only: no foreign key
        "CREATE TABLE IF NOT EXISTS outgoing_operations (
            id TEXT PRIMARY KEY,
            record_id TEXT,
            record_version INTEGER,
            method TEXT NOT NULL,
            target TEXT NOT NULL,
            body TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            failure TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_operations_status_created
            ON outgoing_operations(status, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_operations_record ON outgoing_operations(record_id)",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements)?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: version counters may never decrease
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TRIGGER IF NOT EXISTS collections_version_guard BEFORE UPDATE OF version ON collections
         FOR EACH ROW
         WHEN NEW.version < OLD.version
         BEGIN
             SELECT RAISE(ABORT, 'collection version cannot decrease');
         END",
        "CREATE TRIGGER IF NOT EXISTS collections_id_guard BEFORE UPDATE OF id ON collections
         FOR EACH ROW
         WHEN NEW.id <> OLD.id
         BEGIN
             SELECT RAISE(ABORT, 'collection id is immutable');
         END",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements)?;
    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: conflict payloads and the cross-process drain lease
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    let statements = [
        // Server state returned with a 409, kept until the operation is retried
        "ALTER TABLE outgoing_operations ADD COLUMN conflict_body TEXT",
        // At most one row: whoever holds it may claim and recover operations
        "CREATE TABLE IF NOT EXISTS drain_lease (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (3)",
    ];

    apply(conn, &statements)?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
