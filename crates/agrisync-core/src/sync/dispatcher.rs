//! Queue processor: drains pending operations against the server.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::backoff::RetryPolicy;
use super::error::SyncError;
use super::transport::{OutboundRequest, Transport};
use crate::models::{FailureKind, OutgoingOperation};
use crate::services::DatabaseService;
use crate::Result;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Per-send allowance used to size the default drain lease.
const DEFAULT_SEND_ALLOWANCE: Duration = Duration::from_secs(30);

/// What happened to one operation during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the server and removed from the queue
    Delivered {
        /// Whether the record was marked synced
        synced: bool,
    },
    /// Parked as `failed` for the conflict surface
    Failed(FailureKind),
}

/// Summary of one `process_once` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Another drain was already running; nothing was claimed
    pub skipped: bool,
    pub claimed: usize,
    /// Claimed but left for the next lease holder after the lease was lost
    pub abandoned: usize,
    pub delivered: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub exhausted: usize,
    pub internal: usize,
}

impl DrainReport {
    const fn skipped() -> Self {
        Self {
            skipped: true,
            claimed: 0,
            abandoned: 0,
            delivered: 0,
            conflicts: 0,
            rejected: 0,
            exhausted: 0,
            internal: 0,
        }
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { .. } => self.delivered += 1,
            DeliveryOutcome::Failed(FailureKind::Conflict) => self.conflicts += 1,
            DeliveryOutcome::Failed(FailureKind::Rejected) => self.rejected += 1,
            DeliveryOutcome::Failed(FailureKind::Exhausted) => self.exhausted += 1,
            DeliveryOutcome::Failed(FailureKind::Internal) => self.internal += 1,
        }
    }

    /// Operations that ended up `failed` in this pass.
    pub const fn failed(&self) -> usize {
        self.conflicts + self.rejected + self.exhausted + self.internal
    }
}

/// Delivers queued operations with retry, backoff and failure classification.
///
/// Drains are exclusive per database file: the in-process lock keeps one
/// task draining, and a lease row in the store keeps other processes out.
pub struct Dispatcher {
    store: DatabaseService,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    batch_size: usize,
    holder: String,
    lease_ttl: Duration,
    running: Mutex<()>,
}

impl Dispatcher {
    pub fn new(store: DatabaseService, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let lease_ttl = (DEFAULT_SEND_ALLOWANCE + policy.max_delay) * 2;
        Self {
            store,
            transport,
            policy,
            batch_size: DEFAULT_BATCH_SIZE,
            holder: format!("{}-{}", std::process::id(), Uuid::now_v7()),
            lease_ttl,
            running: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// How long the drain lease survives without renewal. It is renewed
    /// before every send, so it must cover one request plus one backoff.
    #[must_use]
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Drain up to one batch of pending operations, oldest first.
    ///
    /// Returns a skipped report if a drain is already running here or in
    /// another process sharing the database. Operations an interrupted
    /// drain left in `processing` are recovered first. Errors only when the
    /// lease or the batch cannot be taken; per-operation failures are
    /// recorded on the operations themselves.
    pub async fn process_once(&self) -> Result<DrainReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Drain already running, skipping");
            return Ok(DrainReport::skipped());
        };

        if self
            .store
            .begin_drain(&self.holder, self.lease_ttl)
            .await?
            .is_none()
        {
            tracing::debug!("Drain lease held by another process, skipping");
            return Ok(DrainReport::skipped());
        }

        let report = self.drain().await;
        if let Err(error) = self.store.end_drain(&self.holder).await {
            // Expires on its own after the ttl
            tracing::warn!(error = %error, "Failed to release drain lease");
        }
        report
    }

    async fn drain(&self) -> Result<DrainReport> {
        let batch = self.store.claim_pending_operations(self.batch_size).await?;
        let mut report = DrainReport {
            claimed: batch.len(),
            ..DrainReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        tracing::debug!(claimed = batch.len(), "Draining outgoing operations");
        for (index, operation) in batch.iter().enumerate() {
            match self.deliver(operation).await {
                Some(outcome) => report.record(outcome),
                None => {
                    report.abandoned = batch.len() - index;
                    tracing::warn!(
                        abandoned = report.abandoned,
                        "Drain lease lost, stopping before the next send"
                    );
                    break;
                }
            }
        }

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed(),
            "Drain finished"
        );
        Ok(report)
    }

    /// Extend the lease ahead of a send. `false` means another drain may
    /// already have recovered this batch, so nothing more may be sent.
    async fn keep_lease(&self) -> bool {
        match self
            .store
            .renew_drain_lease(&self.holder, self.lease_ttl)
            .await
        {
            Ok(held) => held,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to renew drain lease");
                false
            }
        }
    }

    /// `None` when the lease was lost before the operation finished; the
    /// operation stays in `processing` for the next lease holder.
    async fn deliver(&self, operation: &OutgoingOperation) -> Option<DeliveryOutcome> {
        let request = OutboundRequest::for_operation(operation);
        let mut attempts = operation.attempts;

        // Recovered after a crash with the budget already used up
        if self.policy.is_exhausted(attempts) {
            let error = SyncError::RetriesExhausted {
                attempts,
                last_error: operation
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "no attempts left".to_string()),
            };
            return Some(self.fail(operation, attempts, &error).await);
        }

        loop {
            if !self.keep_lease().await {
                return None;
            }

            attempts += 1;
            let error = match self.transport.send(&request).await {
                Ok(response) => {
                    match SyncError::from_response(response.status, response.body.as_ref()) {
                        None => return Some(self.complete(operation, attempts).await),
                        Some(error) => error,
                    }
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Some(self.fail(operation, attempts, &error).await);
            }

            let message = error.to_string();
            if self.policy.is_exhausted(attempts) {
                let error = SyncError::RetriesExhausted {
                    attempts,
                    last_error: message,
                };
                return Some(self.fail(operation, attempts, &error).await);
            }

            if let Err(store_error) = self
                .store
                .record_attempt(&operation.id, attempts, Some(&message))
                .await
            {
                let error = SyncError::StoreUnavailable(store_error);
                return Some(self.fail(operation, attempts, &error).await);
            }

            let delay = self.policy.delay_for_attempt(attempts);
            tracing::warn!(
                op_id = %operation.id,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %message,
                "Delivery failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn complete(&self, operation: &OutgoingOperation, attempts: u32) -> DeliveryOutcome {
        match self.store.complete_operation(operation).await {
            Ok(synced) => {
                tracing::debug!(
                    op_id = %operation.id,
                    attempt = attempts,
                    synced,
                    "Operation delivered"
                );
                DeliveryOutcome::Delivered { synced }
            }
            Err(store_error) => {
                let error = SyncError::StoreUnavailable(store_error);
                self.fail(operation, attempts, &error).await
            }
        }
    }

    async fn fail(
        &self,
        operation: &OutgoingOperation,
        attempts: u32,
        error: &SyncError,
    ) -> DeliveryOutcome {
        let kind = error.failure_kind();
        let message = error.to_string();

        match kind {
            FailureKind::Conflict => tracing::warn!(
                op_id = %operation.id,
                target = %operation.target,
                "Version conflict, parking operation for manual resolution"
            ),
            _ => tracing::warn!(
                op_id = %operation.id,
                attempt = attempts,
                failure = %kind,
                error = %message,
                "Operation failed"
            ),
        }

        if let Err(store_error) = self
            .store
            .fail_operation(
                operation,
                attempts,
                kind,
                &message,
                error.server_state(),
                error.marks_record_error(),
            )
            .await
        {
            // Left in `processing`; recovered to `pending` by the next drain
            tracing::error!(
                op_id = %operation.id,
                error = %store_error,
                "Failed to record operation failure"
            );
        }
        DeliveryOutcome::Failed(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{
        Collection, CollectionId, NewCollection, OperationStatus, SyncStatus,
    };
    use crate::sync::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store_with_record() -> (DatabaseService, CollectionId) {
        let store = DatabaseService::open_in_memory().await.unwrap();
        let record = Collection::create(
            NewCollection::new("farmer-1", "Maize", 12.5).with_price_per_kg(40.0),
            1_000,
        )
        .unwrap();
        let operation = OutgoingOperation::create_collection(&record, 1_000);
        store.record_collection(&record, &operation).await.unwrap();
        (store, record.id)
    }

    fn dispatcher(store: &DatabaseService, transport: &Arc<ScriptedTransport>) -> Dispatcher {
        Dispatcher::new(store.clone(), transport.clone(), RetryPolicy::default())
    }

    async fn sync_status(store: &DatabaseService, id: &CollectionId) -> SyncStatus {
        store.get_collection(id).await.unwrap().unwrap().sync_status
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_operation_syncs_record_and_empties_queue() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::with_statuses(&[201]));

        let report = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.delivered, 1);

        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Synced);
        assert!(store.list_operations(None, 10).await.unwrap().is_empty());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/collections");
        assert_eq!(requests[0].body.as_ref().unwrap()["weight_kg"], 12.5);
        assert!(requests[0].idempotency_key.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_parks_operation_and_keeps_record_pending() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(
            409,
            Some(json!({"error": "version conflict", "current": {"version": 3}})),
        );

        let report = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(transport.request_count(), 1);

        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Pending);
        let failed = store
            .list_operations(Some(OperationStatus::Failed), 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure, Some(FailureKind::Conflict));
        assert_eq!(failed[0].attempts, 1);
        assert_eq!(
            failed[0].last_error.as_deref(),
            Some("version conflict: version conflict (HTTP 409)")
        );
        assert_eq!(failed[0].conflict_body, Some(json!({"version": 3})));

        // Never retried automatically
        let again = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(again.claimed, 0);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::with_statuses(&[500, 500, 500, 200]));

        let started = tokio::time::Instant::now();
        let report = dispatcher(&store, &transport).process_once().await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_millis(3_500));
        assert_eq!(report.delivered, 1);
        assert_eq!(transport.request_count(), 4);
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Synced);
        assert!(store.list_operations(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_operation_and_record() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_status(503);
        }
        transport.push_network_error("connection refused");

        let report = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(transport.request_count(), 5);

        let failed = store.list_operations(None, 10).await.unwrap();
        assert_eq!(failed[0].status, OperationStatus::Failed);
        assert_eq!(failed[0].failure, Some(FailureKind::Exhausted));
        assert_eq!(failed[0].attempts, 5);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("connection refused"));
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rejection_stops_immediately() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(400, Some(json!({"error": "invalid weight"})));

        let report = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(transport.request_count(), 1);

        let failed = store.list_operations(None, 10).await.unwrap();
        assert_eq!(failed[0].failure, Some(FailureKind::Rejected));
        assert_eq!(
            failed[0].last_error.as_deref(),
            Some("rejected by server: invalid weight (HTTP 400)")
        );
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_status_is_internal_failure() {
        let (store, record_id) = store_with_record().await;
        let transport = Arc::new(ScriptedTransport::with_statuses(&[302]));

        let report = dispatcher(&store, &transport).process_once().await.unwrap();
        assert_eq!(report.internal, 1);

        let failed = store.list_operations(None, 10).await.unwrap();
        assert_eq!(failed[0].failure, Some(FailureKind::Internal));
        assert_eq!(
            failed[0].last_error.as_deref(),
            Some("unexpected response: HTTP 302")
        );
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_drain_is_skipped() {
        let (store, record_id) = store_with_record().await;
        let transport =
            Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(100)));
        let dispatcher = Arc::new(dispatcher(&store, &transport));

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.process_once().await }
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = dispatcher.process_once().await.unwrap();
        assert!(second.skipped);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_size_bounds_one_drain() {
        let store = DatabaseService::open_in_memory().await.unwrap();
        for offset in 0..3 {
            let record =
                Collection::create(NewCollection::new("farmer-1", "Tea", 1.0), 1_000 + offset)
                    .unwrap();
            let operation = OutgoingOperation::create_collection(&record, 1_000 + offset);
            store.record_collection(&record, &operation).await.unwrap();
        }
        let transport = Arc::new(ScriptedTransport::new());
        let dispatcher = dispatcher(&store, &transport).with_batch_size(2);

        assert_eq!(dispatcher.process_once().await.unwrap().delivered, 2);
        assert_eq!(dispatcher.process_once().await.unwrap().delivered, 1);
        assert_eq!(dispatcher.process_once().await.unwrap().claimed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_operation_keeps_attempt_budget() {
        let (store, record_id) = store_with_record().await;
        let operation = store.claim_pending_operations(1).await.unwrap().remove(0);
        store
            .record_attempt(&operation.id, 4, Some("HTTP 500"))
            .await
            .unwrap();

        // Left in `processing` by a drain that never finished
        let transport = Arc::new(ScriptedTransport::with_statuses(&[500]));
        let report = dispatcher(&store, &transport).process_once().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(sync_status(&store, &record_id).await, SyncStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_in_another_handle_blocks_recovery_and_sends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agrisync.db");
        let first_store = DatabaseService::open_path(&path).await.unwrap();
        let second_store = DatabaseService::open_path(&path).await.unwrap();

        let record = Collection::create(NewCollection::new("farmer-1", "Maize", 12.5), 1_000)
            .unwrap();
        let operation = OutgoingOperation::create_collection(&record, 1_000);
        first_store
            .record_collection(&record, &operation)
            .await
            .unwrap();

        let slow = Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(300)));
        let first = Arc::new(dispatcher(&first_store, &slow));
        let running = tokio::spawn({
            let first = first.clone();
            async move { first.process_once().await }
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let other = Arc::new(ScriptedTransport::new());
        let second = dispatcher(&second_store, &other).process_once().await.unwrap();
        assert!(second.skipped);
        assert_eq!(other.request_count(), 0);
        let in_flight = second_store.get_operation(&operation.id).await.unwrap().unwrap();
        assert_eq!(in_flight.status, OperationStatus::Processing);

        let first = running.await.unwrap().unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(slow.request_count(), 1);
        assert_eq!(sync_status(&second_store, &record.id).await, SyncStatus::Synced);

        // Lease released: the second handle may drain again
        let after = dispatcher(&second_store, &other).process_once().await.unwrap();
        assert!(!after.skipped);
        assert_eq!(after.claimed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_stops_before_next_send() {
        let store = DatabaseService::open_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for offset in 0..2 {
            let record =
                Collection::create(NewCollection::new("farmer-1", "Tea", 1.0), 1_000 + offset)
                    .unwrap();
            let operation = OutgoingOperation::create_collection(&record, 1_000 + offset);
            store.record_collection(&record, &operation).await.unwrap();
            ids.push(operation.id);
        }

        let transport =
            Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(100)));
        let expiring = Arc::new(dispatcher(&store, &transport).with_lease_ttl(Duration::ZERO));
        let running = tokio::spawn({
            let expiring = expiring.clone();
            async move { expiring.process_once().await }
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The expired lease is taken over while the first send is in flight
        assert_eq!(
            store
                .begin_drain("takeover", Duration::from_secs(60))
                .await
                .unwrap(),
            Some(2)
        );

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.abandoned, 1);
        assert_eq!(transport.request_count(), 1);

        let left = store.get_operation(&ids[1]).await.unwrap().unwrap();
        assert_eq!(left.status, OperationStatus::Pending);
        assert!(!store.end_drain("other-holder").await.unwrap());
        assert!(store.end_drain("takeover").await.unwrap());
    }
}
