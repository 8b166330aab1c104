//! Outgoing operation queue storage and the drain lease

use crate::error::Result;
use crate::models::{FailureKind, OperationId, OperationStatus, OutgoingOperation};
use rusqlite::{params, Connection, OptionalExtension};

use super::collection_repository::{parse_column, sql_count};

const OPERATION_COLUMNS: &str = "id, record_id, record_version, method, target, body, attempts,
    last_error, failure, status, created_at, updated_at, conflict_body";

/// Trait for queue storage operations
pub trait OperationRepository {
    /// Persist a new operation
    fn insert(&self, operation: &OutgoingOperation) -> Result<()>;

    /// Get an operation by ID
    fn get(&self, id: &OperationId) -> Result<Option<OutgoingOperation>>;

    /// List operations oldest first, optionally filtered by status
    fn list(&self, status: Option<OperationStatus>, limit: usize)
        -> Result<Vec<OutgoingOperation>>;

    /// Move up to `limit` pending operations to `processing` and return them
    ///
    /// Callers run this inside a transaction so the claim is all-or-nothing.
    fn claim_pending(&self, limit: usize, now_ms: i64) -> Result<Vec<OutgoingOperation>>;

    /// Persist the attempt counter and last error of an in-flight operation
    fn record_attempt(
        &self,
        id: &OperationId,
        attempts: u32,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<()>;

    /// Mark an operation terminally failed, keeping the server state sent with a conflict
    fn mark_failed(
        &self,
        id: &OperationId,
        attempts: u32,
        kind: FailureKind,
        error: &str,
        conflict_body: Option<&serde_json::Value>,
        now_ms: i64,
    ) -> Result<()>;

    /// Delete an operation, returning whether a row was removed
    fn delete(&self, id: &OperationId) -> Result<bool>;

    /// Reset a failed operation to pending with a fresh body, clearing failure details
    fn reset(
        &self,
        id: &OperationId,
        body: Option<&serde_json::Value>,
        record_version: Option<i64>,
        now_ms: i64,
    ) -> Result<bool>;

    /// Return every `processing` operation to `pending`
    ///
    /// Only the drain lease holder may call this: any other holder's claimed
    /// operations would be delivered twice.
    fn recover_processing(&self, now_ms: i64) -> Result<usize>;

    /// Count operations per status
    fn count_by_status(&self) -> Result<Vec<(OperationStatus, u64)>>;

    /// Take or extend the drain lease until `expires_at`
    ///
    /// Succeeds when the lease is free, expired at `now_ms`, or already held
    /// by `holder`.
    fn acquire_lease(&self, holder: &str, now_ms: i64, expires_at: i64) -> Result<bool>;

    /// Give the lease up, returning whether `holder` had it
    fn release_lease(&self, holder: &str) -> Result<bool>;
}

/// `SQLite` implementation of `OperationRepository`
pub struct SqliteOperationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOperationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutgoingOperation> {
        let record_id: Option<String> = row.get(1)?;
        let record_id = match record_id {
            Some(_) => Some(parse_column(row, 1)?),
            None => None,
        };
        let failure: Option<String> = row.get(8)?;
        let failure = match failure {
            Some(_) => Some(parse_column::<FailureKind>(row, 8)?),
            None => None,
        };

        Ok(OutgoingOperation {
            id: parse_column(row, 0)?,
            record_id,
            record_version: row.get(2)?,
            method: parse_column(row, 3)?,
            target: row.get(4)?,
            body: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
            failure,
            status: parse_column(row, 9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            conflict_body: row.get(12)?,
        })
    }
}

impl OperationRepository for SqliteOperationRepository<'_> {
    fn insert(&self, operation: &OutgoingOperation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO outgoing_operations (
                id, record_id, record_version, method, target, body, attempts,
                last_error, failure, status, created_at, updated_at, conflict_body
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                operation.id.as_str(),
                operation.record_id.map(|id| id.as_str()),
                operation.record_version,
                operation.method.as_str(),
                operation.target,
                operation.body,
                operation.attempts,
                operation.last_error,
                operation.failure.map(FailureKind::as_str),
                operation.status.as_str(),
                operation.created_at,
                operation.updated_at,
                operation.conflict_body,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &OperationId) -> Result<Option<OutgoingOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!("SELECT {OPERATION_COLUMNS} FROM outgoing_operations WHERE id = ?"),
                params![id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    fn list(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<OutgoingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM outgoing_operations
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC, id ASC
             LIMIT ?2"
        ))?;
        let operations = stmt
            .query_map(
                params![status.map(OperationStatus::as_str), sql_count(limit)],
                Self::parse_operation,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(operations)
    }

    fn claim_pending(&self, limit: usize, now_ms: i64) -> Result<Vec<OutgoingOperation>> {
        let mut claimed = self.list(Some(OperationStatus::Pending), limit)?;
        for operation in &mut claimed {
            self.conn.execute(
                "UPDATE outgoing_operations SET status = 'processing', updated_at = ?
                 WHERE id = ? AND status = 'pending'",
                params![now_ms, operation.id.as_str()],
            )?;
            operation.status = OperationStatus::Processing;
            operation.updated_at = now_ms;
        }
        Ok(claimed)
    }

    fn record_attempt(
        &self,
        id: &OperationId,
        attempts: u32,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE outgoing_operations SET attempts = ?, last_error = ?, updated_at = ?
             WHERE id = ?",
            params![attempts, error, now_ms, id.as_str()],
        )?;
        Ok(())
    }

    fn mark_failed(
        &self,
        id: &OperationId,
        attempts: u32,
        kind: FailureKind,
        error: &str,
        conflict_body: Option<&serde_json::Value>,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE outgoing_operations
             SET status = 'failed', attempts = ?, failure = ?, last_error = ?,
                 conflict_body = ?, updated_at = ?
             WHERE id = ?",
            params![attempts, kind.as_str(), error, conflict_body, now_ms, id.as_str()],
        )?;
        Ok(())
    }

    fn delete(&self, id: &OperationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM outgoing_operations WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn reset(
        &self,
        id: &OperationId,
        body: Option<&serde_json::Value>,
        record_version: Option<i64>,
        now_ms: i64,
    ) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE outgoing_operations
             SET status = 'pending', attempts = 0, last_error = NULL, failure = NULL,
                 conflict_body = NULL, body = ?, record_version = ?, updated_at = ?
             WHERE id = ? AND status = 'failed'",
            params![body, record_version, now_ms, id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn recover_processing(&self, now_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE outgoing_operations SET status = 'pending', updated_at = ?
             WHERE status = 'processing'",
            params![now_ms],
        )?;
        Ok(rows)
    }

    fn count_by_status(&self) -> Result<Vec<(OperationStatus, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM outgoing_operations GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((parse_column(row, 0)?, row.get::<_, u64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    fn acquire_lease(&self, holder: &str, now_ms: i64, expires_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT INTO drain_lease (id, holder, expires_at) VALUES (1, ?1, ?3)
             ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
             WHERE drain_lease.holder = excluded.holder OR drain_lease.expires_at <= ?2",
            params![holder, now_ms, expires_at],
        )?;
        Ok(rows > 0)
    }

    fn release_lease(&self, holder: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM drain_lease WHERE holder = ?",
            params![holder],
        )?;
        Ok(rows > 0)
    }
}
