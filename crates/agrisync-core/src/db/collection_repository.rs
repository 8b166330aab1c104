//! Collection repository implementation

use std::str::FromStr;

use crate::error::Result;
use crate::models::{Collection, CollectionId, SyncStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const COLLECTION_COLUMNS: &str = "id, farmer_id, collector_id, crop_type, weight_kg, price_per_kg,
    status, created_at, updated_at, version, sync_status, writer_id, last_writer_at";

/// Trait for collection storage operations
pub trait CollectionRepository {
    /// Insert or replace a collection; `id` and `created_at` are never rewritten
    fn put(&self, collection: &Collection) -> Result<()>;

    /// Get a collection by ID
    fn get(&self, id: &CollectionId) -> Result<Option<Collection>>;

    /// List collections, most recently updated first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Collection>>;

    /// List collections in a sync state (served by the sync status index)
    fn list_by_status(&self, status: SyncStatus, limit: usize) -> Result<Vec<Collection>>;

    /// List collections recorded for a farmer, optionally in one sync state
    fn list_by_farmer(
        &self,
        farmer_id: &str,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<Collection>>;

    /// Move a collection to a new sync state, bumping its version
    ///
    /// Provenance (`writer_id`, `last_writer_at`) is left alone: a sync state
    /// transition is not a write by anyone.
    fn update_sync_status(
        &self,
        id: &CollectionId,
        status: SyncStatus,
        now_ms: i64,
    ) -> Result<Option<Collection>>;

    /// Mark a collection synced only if it is still at `version`
    fn mark_synced(&self, id: &CollectionId, version: i64, now_ms: i64) -> Result<bool>;

    /// Count collections per sync state
    fn count_by_sync_status(&self) -> Result<Vec<(SyncStatus, u64)>>;
}

/// `SQLite` implementation of `CollectionRepository`
pub struct SqliteCollectionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCollectionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a collection from a database row
    fn parse_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Collection> {
        Ok(Collection {
            id: parse_column(row, 0)?,
            farmer_id: row.get(1)?,
            collector_id: row.get(2)?,
            crop_type: row.get(3)?,
            weight_kg: row.get(4)?,
            price_per_kg: row.get(5)?,
            status: parse_column(row, 6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            version: row.get(9)?,
            sync_status: parse_column(row, 10)?,
            writer_id: row.get(11)?,
            last_writer_at: row.get(12)?,
        })
    }

    fn query_collections(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Collection>> {
        let mut stmt = self.conn.prepare(sql)?;
        let collections = stmt
            .query_map(params, Self::parse_collection)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(collections)
    }
}

/// Bind a `usize` limit or offset; values past `i64::MAX` saturate
pub(crate) fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Parse a TEXT column through `FromStr`, surfacing bad values as conversion errors
pub(crate) fn parse_column<T>(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(index)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}

impl CollectionRepository for SqliteCollectionRepository<'_> {
    fn put(&self, collection: &Collection) -> Result<()> {
        self.conn.execute(
            "INSERT INTO collections (
                id, farmer_id, collector_id, crop_type, weight_kg, price_per_kg, status,
                created_at, updated_at, version, sync_status, writer_id, last_writer_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                farmer_id = excluded.farmer_id,
                collector_id = excluded.collector_id,
                crop_type = excluded.crop_type,
                weight_kg = excluded.weight_kg,
                price_per_kg = excluded.price_per_kg,
                status = excluded.status,
                updated_at = excluded.updated_at,
                version = excluded.version,
                sync_status = excluded.sync_status,
                writer_id = excluded.writer_id,
                last_writer_at = excluded.last_writer_at",
            params![
                collection.id.as_str(),
                collection.farmer_id,
                collection.collector_id,
                collection.crop_type,
                collection.weight_kg,
                collection.price_per_kg,
                collection.status.as_str(),
                collection.created_at,
                collection.updated_at,
                collection.version,
                collection.sync_status.as_str(),
                collection.writer_id,
                collection.last_writer_at,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &CollectionId) -> Result<Option<Collection>> {
        let collection = self
            .conn
            .query_row(
                &format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE id = ?"),
                params![id.as_str()],
                Self::parse_collection,
            )
            .optional()?;
        Ok(collection)
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Collection>> {
        self.query_collections(
            &format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![sql_count(limit), sql_count(offset)],
        )
    }

    fn list_by_status(&self, status: SyncStatus, limit: usize) -> Result<Vec<Collection>> {
        self.query_collections(
            &format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections
                 WHERE sync_status = ?
                 ORDER BY created_at ASC
                 LIMIT ?"
            ),
            params![status.as_str(), sql_count(limit)],
        )
    }

    fn list_by_farmer(
        &self,
        farmer_id: &str,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<Collection>> {
        self.query_collections(
            &format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections
                 WHERE farmer_id = ?1 AND (?2 IS NULL OR sync_status = ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ),
            params![farmer_id, status.map(SyncStatus::as_str), sql_count(limit)],
        )
    }

    fn update_sync_status(
        &self,
        id: &CollectionId,
        status: SyncStatus,
        now_ms: i64,
    ) -> Result<Option<Collection>> {
        let rows = self.conn.execute(
            "UPDATE collections
             SET sync_status = ?,
                 version = version + 1,
                 updated_at = MAX(updated_at, ?)
             WHERE id = ?",
            params![status.as_str(), now_ms, id.as_str()],
        )?;

        if rows == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    fn mark_synced(&self, id: &CollectionId, version: i64, now_ms: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE collections
             SET sync_status = 'synced', updated_at = MAX(updated_at, ?)
             WHERE id = ? AND version = ?",
            params![now_ms, id.as_str(), version],
        )?;
        Ok(rows > 0)
    }

    fn count_by_sync_status(&self) -> Result<Vec<(SyncStatus, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM collections GROUP BY sync_status")?;
        let counts = stmt
            .query_map([], |row| Ok((parse_column(row, 0)?, row.get::<_, u64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}
