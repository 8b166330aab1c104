use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agrisync_core::models::{OperationId, OperationStatus, OutgoingOperation, StoreStats};
use agrisync_core::sync::{
    DrainReport, HttpTransport, OutboundRequest, StaticCredentials, SyncError, SyncResult,
    Transport, TransportResponse,
};
use agrisync_core::{
    Collection, CollectionId, CollectionStatus, DatabaseService, SyncEngine, SyncSettings,
    SyncStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::cli::{QueueStatusArg, StatusArg, SyncStatusArg};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct CollectionListItem {
    pub id: String,
    pub farmer_id: String,
    pub crop_type: String,
    pub weight_kg: f64,
    pub price_per_kg: f64,
    pub total_price: f64,
    pub status: CollectionStatus,
    pub sync_status: SyncStatus,
    pub version: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn collection_to_list_item(collection: &Collection) -> CollectionListItem {
    CollectionListItem {
        id: collection.id.to_string(),
        farmer_id: collection.farmer_id.clone(),
        crop_type: collection.crop_type.clone(),
        weight_kg: collection.weight_kg,
        price_per_kg: collection.price_per_kg,
        total_price: collection.total_price(),
        status: collection.status,
        sync_status: collection.sync_status,
        version: collection.version,
        updated_at: collection.updated_at,
        relative_time: format_relative_time(collection.updated_at, Utc::now().timestamp_millis()),
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("AGRISYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agrisync")
        .join("agrisync.db")
}

pub async fn open_database(path: &Path) -> Result<DatabaseService, CliError> {
    Ok(DatabaseService::open_path(path).await?)
}

/// Open the engine for commands that only touch the local store.
pub async fn open_local_engine(db_path: &Path) -> Result<SyncEngine, CliError> {
    let settings = SyncSettings::from_env()?;
    let transport: Arc<dyn Transport> = match settings.api_base_url.as_deref() {
        Some(base_url) => Arc::new(http_transport(base_url, &settings)?),
        None => Arc::new(Unconfigured),
    };
    let store = open_database(db_path).await?;
    Ok(SyncEngine::new(store, transport, settings))
}

/// Open the engine for commands that talk to the server.
pub async fn open_network_engine(
    db_path: &Path,
) -> Result<(SyncEngine, Arc<dyn Transport>), CliError> {
    let settings = SyncSettings::from_env()?;
    let transport: Arc<dyn Transport> =
        Arc::new(http_transport(settings.require_api_base_url()?, &settings)?);
    let store = open_database(db_path).await?;
    Ok((
        SyncEngine::new(store, transport.clone(), settings),
        transport,
    ))
}

fn http_transport(base_url: &str, settings: &SyncSettings) -> Result<HttpTransport, CliError> {
    let credentials = Arc::new(StaticCredentials::new(settings.token.clone()));
    Ok(HttpTransport::new(
        base_url,
        settings.request_timeout,
        credentials,
    )?)
}

/// Transport used when no server is configured.
struct Unconfigured;

#[async_trait]
impl Transport for Unconfigured {
    async fn send(&self, _request: &OutboundRequest) -> SyncResult<TransportResponse> {
        Err(SyncError::TransientNetwork(
            "AGRISYNC_API_BASE_URL is not set".to_string(),
        ))
    }

    async fn probe(&self) -> bool {
        false
    }
}

pub fn parse_collection_id(raw: &str) -> Result<CollectionId, CliError> {
    raw.trim()
        .parse::<CollectionId>()
        .map_err(|_| CliError::InvalidId(raw.to_string()))
}

pub fn parse_operation_id(raw: &str) -> Result<OperationId, CliError> {
    raw.trim()
        .parse::<OperationId>()
        .map_err(|_| CliError::InvalidId(raw.to_string()))
}

impl From<StatusArg> for CollectionStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Verified => Self::Verified,
            StatusArg::Paid => Self::Paid,
        }
    }
}

impl From<SyncStatusArg> for SyncStatus {
    fn from(value: SyncStatusArg) -> Self {
        match value {
            SyncStatusArg::Pending => Self::Pending,
            SyncStatusArg::Synced => Self::Synced,
            SyncStatusArg::Error => Self::Error,
        }
    }
}

impl From<QueueStatusArg> for OperationStatus {
    fn from(value: QueueStatusArg) -> Self {
        match value {
            QueueStatusArg::Pending => Self::Pending,
            QueueStatusArg::Processing => Self::Processing,
            QueueStatusArg::Failed => Self::Failed,
        }
    }
}

pub fn format_collection_lines(collections: &[Collection], now_ms: i64) -> Vec<String> {
    collections
        .iter()
        .map(|collection| {
            format!(
                "{}  {} {} {:.2}kg  {}  [{} v{}]  {}",
                collection.id,
                collection.farmer_id,
                collection.crop_type,
                collection.weight_kg,
                collection.status,
                collection.sync_status,
                collection.version,
                format_relative_time(collection.updated_at, now_ms)
            )
        })
        .collect()
}

pub fn format_operation_lines(operations: &[OutgoingOperation], now_ms: i64) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let mut line = format!(
                "{}  {} {}  {}  attempts={}  {}",
                operation.id,
                operation.method,
                operation.target,
                operation.status,
                operation.attempts,
                format_relative_time(operation.updated_at, now_ms)
            );
            if let Some(failure) = operation.failure {
                line.push_str(&format!("  ({failure})"));
            }
            if let Some(error) = operation.last_error.as_deref() {
                line.push_str(&format!("  {error}"));
            }
            line
        })
        .collect()
}

pub fn format_drain_report(report: &DrainReport) -> String {
    if report.skipped {
        return "Another drain is already running; nothing was sent.".to_string();
    }
    if report.claimed == 0 {
        return "Queue is empty.".to_string();
    }
    let mut summary = format!(
        "Claimed {}: {} delivered, {} conflicts, {} rejected, {} exhausted, {} internal",
        report.claimed,
        report.delivered,
        report.conflicts,
        report.rejected,
        report.exhausted,
        report.internal
    );
    if report.abandoned > 0 {
        summary.push_str(&format!(
            " ({} left for the next drain after the lease was lost)",
            report.abandoned
        ));
    }
    summary
}

pub fn format_stats_lines(stats: &StoreStats) -> Vec<String> {
    vec![
        format!(
            "Records: {} total ({} pending, {} synced, {} error)",
            stats.total_records(),
            stats.pending_records,
            stats.synced_records,
            stats.error_records
        ),
        format!(
            "Queue: {} operations ({} pending, {} processing, {} failed)",
            stats.queue_depth(),
            stats.pending_operations,
            stats.processing_operations,
            stats.failed_operations
        ),
    ]
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}
