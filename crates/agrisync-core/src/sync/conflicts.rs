//! Operator view over failed operations.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;

use super::error::SyncError;
use super::transport::{OutboundRequest, Transport};
use crate::models::{Collection, OperationId, OperationStatus, OutgoingOperation};
use crate::services::DatabaseService;

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error(transparent)]
    Store(#[from] crate::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type ConflictResult<T> = Result<T, ConflictError>;

/// A failed operation with the record it describes, if that still exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub operation: OutgoingOperation,
    pub record: Option<Collection>,
}

impl FailedOperation {
    /// Server copy returned with the conflict that parked this operation.
    pub fn server_state(&self) -> Option<&serde_json::Value> {
        self.operation.conflict_body.as_ref()
    }
}

/// The server's copy of the resource an operation targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub path: String,
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct ConflictSurface {
    store: DatabaseService,
    transport: Arc<dyn Transport>,
    wake: Arc<Notify>,
    writer_id: String,
}

impl ConflictSurface {
    pub fn new(
        store: DatabaseService,
        transport: Arc<dyn Transport>,
        wake: Arc<Notify>,
        writer_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            wake,
            writer_id: writer_id.into(),
        }
    }

    /// Failed operations, oldest first.
    pub async fn list(&self, limit: usize) -> ConflictResult<Vec<FailedOperation>> {
        let operations = self
            .store
            .list_operations(Some(OperationStatus::Failed), limit)
            .await?;

        let mut failed = Vec::with_capacity(operations.len());
        for operation in operations {
            let record = match operation.record_id {
                Some(record_id) => self.store.get_collection(&record_id).await?,
                None => None,
            };
            failed.push(FailedOperation { operation, record });
        }
        Ok(failed)
    }

    /// Put a failed operation back in the queue and wake the scheduler.
    pub async fn retry(&self, id: &OperationId) -> ConflictResult<FailedOperation> {
        let (operation, record) = self
            .store
            .reset_failed_operation(id, &self.writer_id)
            .await?;
        tracing::info!(
            op_id = %operation.id,
            record_version = ?operation.record_version,
            "Operation reset for retry"
        );
        self.wake.notify_one();
        Ok(FailedOperation { operation, record })
    }

    /// Read the server's current copy of the targeted resource.
    pub async fn inspect(&self, id: &OperationId) -> ConflictResult<ServerSnapshot> {
        let operation = self
            .store
            .get_operation(id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("operation {id}")))?;

        let path = operation.resource_path();
        let response = self.transport.send(&OutboundRequest::get(&path)).await?;
        Ok(ServerSnapshot {
            path,
            status: response.status,
            body: response.body,
        })
    }

    /// Drop a failed operation for good. The record is kept.
    pub async fn discard(&self, id: &OperationId) -> ConflictResult<OutgoingOperation> {
        let operation = self.store.discard_operation(id).await?;
        tracing::info!(op_id = %operation.id, "Discarded failed operation");
        Ok(operation)
    }
}
