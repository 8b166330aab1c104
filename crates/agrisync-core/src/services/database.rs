//! Shared database service wrapper used by the sync engine and the CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::TransactionBehavior;
use tokio::sync::Mutex;

use crate::db::{
    CollectionRepository, Database, OperationRepository, SqliteCollectionRepository,
    SqliteOperationRepository,
};
use crate::models::{
    Collection, CollectionId, CollectionStatus, FailureKind, OperationId, OperationStatus,
    OutgoingOperation, StoreStats, SyncStatus,
};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Thread-safe service for DB and repository operations.
///
/// Every method takes the lock for the duration of one synchronous
/// statement or transaction; the lock is never held across network I/O.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Fetch a collection by id.
    pub async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>> {
        let db = self.db.lock().await;
        let repo = SqliteCollectionRepository::new(db.connection());
        repo.get(id)
    }

    /// List collections, most recently updated first.
    pub async fn list_collections(&self, limit: usize, offset: usize) -> Result<Vec<Collection>> {
        let db = self.db.lock().await;
        let repo = SqliteCollectionRepository::new(db.connection());
        repo.list(limit, offset)
    }

    /// List collections in one sync state.
    pub async fn list_collections_by_status(
        &self,
        status: SyncStatus,
        limit: usize,
    ) -> Result<Vec<Collection>> {
        let db = self.db.lock().await;
        let repo = SqliteCollectionRepository::new(db.connection());
        repo.list_by_status(status, limit)
    }

    /// List collections recorded for a farmer, optionally in one sync state.
    pub async fn list_collections_by_farmer(
        &self,
        farmer_id: &str,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<Collection>> {
        let db = self.db.lock().await;
        let repo = SqliteCollectionRepository::new(db.connection());
        repo.list_by_farmer(farmer_id, status, limit)
    }

    /// Persist a new collection together with the operation that publishes it.
    pub async fn record_collection(
        &self,
        collection: &Collection,
        operation: &OutgoingOperation,
    ) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        SqliteCollectionRepository::new(&tx).put(collection)?;
        SqliteOperationRepository::new(&tx).insert(operation)?;
        tx.commit()?;
        Ok(())
    }

    /// Change the business status of a collection and queue the matching patch.
    pub async fn apply_status_change(
        &self,
        id: &CollectionId,
        status: CollectionStatus,
        writer_id: &str,
    ) -> Result<(Collection, OutgoingOperation)> {
        let now = unix_millis_now();
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let collections = SqliteCollectionRepository::new(&tx);
        let mut collection = collections
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))?;
        collection.status = status;
        collection.sync_status = SyncStatus::Pending;
        collection.touch(writer_id, now);
        collections.put(&collection)?;

        let operation = OutgoingOperation::update_collection_status(&collection, now);
        SqliteOperationRepository::new(&tx).insert(&operation)?;
        tx.commit()?;
        Ok((collection, operation))
    }

    /// Durably queue an operation.
    pub async fn enqueue_operation(&self, operation: &OutgoingOperation) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteOperationRepository::new(db.connection());
        repo.insert(operation)
    }

    /// Fetch a queued operation by id.
    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<OutgoingOperation>> {
        let db = self.db.lock().await;
        let repo = SqliteOperationRepository::new(db.connection());
        repo.get(id)
    }

    /// List queued operations oldest first.
    pub async fn list_operations(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<OutgoingOperation>> {
        let db = self.db.lock().await;
        let repo = SqliteOperationRepository::new(db.connection());
        repo.list(status, limit)
    }

    /// Claim a batch of pending operations for delivery.
    pub async fn claim_pending_operations(&self, limit: usize) -> Result<Vec<OutgoingOperation>> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let claimed = SqliteOperationRepository::new(&tx).claim_pending(limit, unix_millis_now())?;
        tx.commit()?;
        Ok(claimed)
    }

    /// Persist progress of an in-flight operation.
    pub async fn record_attempt(
        &self,
        id: &OperationId,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteOperationRepository::new(db.connection());
        repo.record_attempt(id, attempts, error, unix_millis_now())
    }

    /// Remove a delivered operation and mark its record synced.
    ///
    /// Returns whether the record was marked synced; a record that moved past
    /// the delivered version stays as it is.
    pub async fn complete_operation(&self, operation: &OutgoingOperation) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        SqliteOperationRepository::new(&tx).delete(&operation.id)?;

        let synced = match (operation.record_id, operation.record_version) {
            (Some(record_id), Some(version)) => SqliteCollectionRepository::new(&tx)
                .mark_synced(&record_id, version, unix_millis_now())?,
            _ => false,
        };
        tx.commit()?;
        Ok(synced)
    }

    /// Mark an operation terminally failed, optionally moving its record to `error`.
    ///
    /// `conflict_body` is the server's copy returned with a version conflict.
    pub async fn fail_operation(
        &self,
        operation: &OutgoingOperation,
        attempts: u32,
        kind: FailureKind,
        error: &str,
        conflict_body: Option<&serde_json::Value>,
        mark_record_error: bool,
    ) -> Result<()> {
        let now = unix_millis_now();
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        SqliteOperationRepository::new(&tx).mark_failed(
            &operation.id,
            attempts,
            kind,
            error,
            conflict_body,
            now,
        )?;

        if mark_record_error {
            if let Some(record_id) = operation.record_id {
                SqliteCollectionRepository::new(&tx).update_sync_status(
                    &record_id,
                    SyncStatus::Error,
                    now,
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reset a failed operation to pending for another delivery round.
    ///
    /// The linked record, if any, is moved back to `pending` with a fresh
    /// version, and that version is stamped into the operation body.
    pub async fn reset_failed_operation(
        &self,
        id: &OperationId,
        writer_id: &str,
    ) -> Result<(OutgoingOperation, Option<Collection>)> {
        let now = unix_millis_now();
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;

        let operations = SqliteOperationRepository::new(&tx);
        let mut operation = operations
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        if operation.status != OperationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "operation {id} is {}, only failed operations can be retried",
                operation.status
            )));
        }

        let collections = SqliteCollectionRepository::new(&tx);
        let record = match operation.record_id {
            Some(record_id) => collections.get(&record_id)?,
            None => None,
        };
        let record = match record {
            Some(mut record) => {
                record.sync_status = SyncStatus::Pending;
                record.touch(writer_id, now);
                collections.put(&record)?;
                stamp_version(&mut operation, &record);
                Some(record)
            }
            None => None,
        };

        operations.reset(
            &operation.id,
            operation.body.as_ref(),
            operation.record_version,
            now,
        )?;
        tx.commit()?;

        operation.status = OperationStatus::Pending;
        operation.attempts = 0;
        operation.last_error = None;
        operation.failure = None;
        operation.conflict_body = None;
        operation.updated_at = now;
        Ok((operation, record))
    }

    /// Delete a failed operation. The record it describes is kept.
    pub async fn discard_operation(&self, id: &OperationId) -> Result<OutgoingOperation> {
        let db = self.db.lock().await;
        let repo = SqliteOperationRepository::new(db.connection());
        let operation = repo
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        if operation.status != OperationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "operation {id} is {}, only failed operations can be discarded",
                operation.status
            )));
        }
        repo.delete(id)?;
        Ok(operation)
    }

    /// Take the drain lease for `holder` and recover interrupted operations.
    ///
    /// Returns `None` while another holder's lease is live, in this process
    /// or another one. Otherwise returns how many operations left in
    /// `processing` by an earlier drain went back to `pending`.
    pub async fn begin_drain(&self, holder: &str, ttl: Duration) -> Result<Option<usize>> {
        let now = unix_millis_now();
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let operations = SqliteOperationRepository::new(&tx);
        if !operations.acquire_lease(holder, now, lease_expiry(now, ttl))? {
            return Ok(None);
        }
        let recovered = operations.recover_processing(now)?;
        tx.commit()?;
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted operation(s)", recovered);
        }
        Ok(Some(recovered))
    }

    /// Extend the drain lease. `false` means `holder` no longer owns it.
    pub async fn renew_drain_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = unix_millis_now();
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let renewed =
            SqliteOperationRepository::new(&tx).acquire_lease(holder, now, lease_expiry(now, ttl))?;
        tx.commit()?;
        Ok(renewed)
    }

    /// Release the drain lease if `holder` still owns it.
    pub async fn end_drain(&self, holder: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).release_lease(holder)
    }

    /// Row counts by record and operation state.
    pub async fn stats(&self) -> Result<StoreStats> {
        let db = self.db.lock().await;
        let mut stats = StoreStats::default();

        let collections = SqliteCollectionRepository::new(db.connection());
        for (status, count) in collections.count_by_sync_status()? {
            match status {
                SyncStatus::Pending => stats.pending_records = count,
                SyncStatus::Synced => stats.synced_records = count,
                SyncStatus::Error => stats.error_records = count,
            }
        }
        let operations = SqliteOperationRepository::new(db.connection());
        for (status, count) in operations.count_by_status()? {
            match status {
                OperationStatus::Pending => stats.pending_operations = count,
                OperationStatus::Processing => stats.processing_operations = count,
                OperationStatus::Failed => stats.failed_operations = count,
                OperationStatus::Done => {}
            }
        }
        Ok(stats)
    }
}

fn lease_expiry(now_ms: i64, ttl: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn stamp_version(operation: &mut OutgoingOperation, record: &Collection) {
    operation.record_version = Some(record.version);
    if let Some(serde_json::Value::Object(body)) = operation.body.as_mut() {
        body.insert("version".into(), record.version.into());
        body.insert("writer_id".into(), record.writer_id.clone().into());
        body.insert("last_writer_at".into(), record.last_writer_at.into());
    }
}
