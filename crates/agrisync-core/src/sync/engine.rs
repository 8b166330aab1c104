//! Entry point tying the store, dispatcher, scheduler and conflict surface together.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Notify};

use super::conflicts::ConflictSurface;
use super::connectivity::Connectivity;
use super::dispatcher::{Dispatcher, DrainReport};
use super::scheduler::{Scheduler, SchedulerHandle};
use super::transport::Transport;
use crate::config::SyncSettings;
use crate::models::{
    Collection, CollectionId, CollectionStatus, NewCollection, OperationId, OutgoingOperation,
};
use crate::services::DatabaseService;
use crate::util::unix_millis_now;
use crate::Result;

/// What a local write produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReceipt {
    pub collection: Collection,
    /// The queued operation that will publish this write
    pub operation_id: OperationId,
}

/// Local-first sync engine.
///
/// Writes return once they are durable locally. Delivery happens in drains,
/// either on demand through [`SyncEngine::process_once`] or from the
/// background scheduler started with [`SyncEngine::start`].
pub struct SyncEngine {
    store: DatabaseService,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    settings: SyncSettings,
    wake: Arc<Notify>,
}

impl SyncEngine {
    pub fn new(store: DatabaseService, transport: Arc<dyn Transport>, settings: SyncSettings) -> Self {
        let lease_ttl = (settings.request_timeout + settings.retry.max_delay) * 2;
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), settings.retry)
            .with_batch_size(settings.batch_size)
            .with_lease_ttl(lease_ttl);
        Self {
            store,
            transport,
            dispatcher: Arc::new(dispatcher),
            settings,
            wake: Arc::new(Notify::new()),
        }
    }

    pub const fn store(&self) -> &DatabaseService {
        &self.store
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Validate and store a new collection, queueing its create call.
    ///
    /// Performs no network I/O.
    pub async fn record_collection(&self, mut input: NewCollection) -> Result<CollectionReceipt> {
        if input.writer_id.is_none() {
            input.writer_id = Some(self.settings.writer_id.clone());
        }
        let now = unix_millis_now();
        let collection = Collection::create(input, now)?;
        let operation = OutgoingOperation::create_collection(&collection, now);
        self.store.record_collection(&collection, &operation).await?;

        tracing::info!(
            record_id = %collection.id,
            op_id = %operation.id,
            "Recorded collection"
        );
        self.wake.notify_one();
        Ok(CollectionReceipt {
            collection,
            operation_id: operation.id,
        })
    }

    /// Change the business status of a collection, queueing the patch call.
    pub async fn update_collection_status(
        &self,
        id: &CollectionId,
        status: CollectionStatus,
    ) -> Result<CollectionReceipt> {
        let (collection, operation) = self
            .store
            .apply_status_change(id, status, &self.settings.writer_id)
            .await?;

        tracing::info!(
            record_id = %collection.id,
            op_id = %operation.id,
            status = %status,
            version = collection.version,
            "Queued status change"
        );
        self.wake.notify_one();
        Ok(CollectionReceipt {
            collection,
            operation_id: operation.id,
        })
    }

    /// Queue an arbitrary operation.
    pub async fn enqueue(&self, operation: &OutgoingOperation) -> Result<OperationId> {
        self.store.enqueue_operation(operation).await?;
        tracing::debug!(op_id = %operation.id, target = %operation.target, "Enqueued operation");
        self.wake.notify_one();
        Ok(operation.id)
    }

    /// Run one drain now.
    pub async fn process_once(&self) -> Result<DrainReport> {
        self.dispatcher.process_once().await
    }

    pub fn conflicts(&self) -> ConflictSurface {
        ConflictSurface::new(
            self.store.clone(),
            self.transport.clone(),
            self.wake.clone(),
            self.settings.writer_id.clone(),
        )
    }

    /// Start the background scheduler.
    ///
    /// Without a connectivity source, drains run only at start, on the tick,
    /// and after local writes.
    pub fn start(&self, connectivity: Option<watch::Receiver<Connectivity>>) -> SchedulerHandle {
        let mut scheduler = Scheduler::new(self.dispatcher.clone())
            .with_tick(self.settings.tick_interval)
            .with_wake(self.wake.clone());
        if let Some(connectivity) = connectivity {
            scheduler = scheduler.with_connectivity(connectivity);
        }
        tracing::info!(
            tick_secs = self.settings.tick_interval.as_secs(),
            "Starting sync scheduler"
        );
        scheduler.spawn()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{HttpMethod, OperationStatus, SyncStatus};
    use crate::sync::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;

    async fn engine(transport: &Arc<ScriptedTransport>) -> SyncEngine {
        let store = DatabaseService::open_in_memory().await.unwrap();
        let settings = SyncSettings {
            writer_id: "collector-7".to_string(),
            ..SyncSettings::default()
        };
        SyncEngine::new(store, transport.clone(), settings)
    }

    #[tokio::test]
    async fn record_collection_is_local_only() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport).await;

        let receipt = engine
            .record_collection(NewCollection::new("farmer-1", "Maize", 12.5))
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 0);
        assert_eq!(receipt.collection.writer_id, "collector-7");
        assert_eq!(receipt.collection.sync_status, SyncStatus::Pending);

        let queued = engine
            .store()
            .list_operations(Some(OperationStatus::Pending), 10)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, receipt.operation_id);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_storage() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport).await;

        let result = engine
            .record_collection(NewCollection {
                crop_type: Some("Maize".into()),
                ..NewCollection::default()
            })
            .await;
        assert!(matches!(result, Err(crate::Error::Validation { .. })));
        assert!(engine.store().list_operations(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_change_patch_delivers_latest_version() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport).await;

        let created = engine
            .record_collection(NewCollection::new("farmer-1", "Maize", 12.5))
            .await
            .unwrap();
        let updated = engine
            .update_collection_status(&created.collection.id, CollectionStatus::Verified)
            .await
            .unwrap();
        assert_eq!(updated.collection.version, 2);

        let report = engine.process_once().await.unwrap();
        assert_eq!(report.delivered, 2);

        let requests = transport.requests();
        let patch = requests
            .iter()
            .find(|request| request.method == HttpMethod::Patch)
            .unwrap();
        assert_eq!(patch.path, format!("/collections/{}/status", created.collection.id));
        assert_eq!(patch.body.as_ref().unwrap()["status"], "verified");
        assert_eq!(patch.body.as_ref().unwrap()["version"], 2);

        let stored = engine
            .store()
            .get_collection(&created.collection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn enqueue_stores_standalone_operation_without_sending() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport).await;

        let operation = OutgoingOperation::new(
            HttpMethod::Post,
            "farmers/farmer-1/notes",
            Some(serde_json::json!({"note": "late pickup"})),
            unix_millis_now(),
        );
        let id = engine.enqueue(&operation).await.unwrap();
        assert_eq!(id, operation.id);
        assert_eq!(transport.request_count(), 0);

        let stored = engine.store().get_operation(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.target, "/farmers/farmer-1/notes");
        assert!(stored.record_id.is_none());
        assert!(stored.record_version.is_none());

        let report = engine.process_once().await.unwrap();
        assert_eq!(report.delivered, 1);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/farmers/farmer-1/notes");
        assert_eq!(requests[0].body.as_ref().unwrap()["note"], "late pickup");
        assert!(engine.store().get_operation(&id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn started_engine_delivers_after_enqueue() {
        let transport = Arc::new(ScriptedTransport::new());
        let engine = engine(&transport).await;
        let handle = engine.start(None);

        let receipt = engine
            .record_collection(NewCollection::new("farmer-2", "Coffee", 3.0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(transport.request_count(), 1);
        let stored = engine
            .store()
            .get_collection(&receipt.collection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        handle.shutdown().await;
    }
}
