use std::path::Path;

use agrisync_core::sync::FailedOperation;
use chrono::Utc;

use crate::commands::common::{
    format_operation_lines, open_local_engine, open_network_engine, parse_operation_id,
};
use crate::error::CliError;

pub async fn run_conflicts_list(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let engine = open_local_engine(db_path).await?;
    let failed = engine.conflicts().list(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&failed)?);
        return Ok(());
    }

    if failed.is_empty() {
        println!("No failed operations.");
        return Ok(());
    }

    for line in format_failed_lines(&failed, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_retry(id: &str, db_path: &Path) -> Result<(), CliError> {
    let operation_id = parse_operation_id(id)?;
    let engine = open_local_engine(db_path).await?;
    let retried = engine.conflicts().retry(&operation_id).await?;

    match retried.operation.record_version {
        Some(version) => println!("Requeued {} at version {version}", retried.operation.id),
        None => println!("Requeued {}", retried.operation.id),
    }
    Ok(())
}

pub async fn run_conflicts_inspect(id: &str, db_path: &Path) -> Result<(), CliError> {
    let operation_id = parse_operation_id(id)?;
    let (engine, _) = open_network_engine(db_path).await?;
    let snapshot = engine.conflicts().inspect(&operation_id).await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

pub async fn run_conflicts_discard(id: &str, db_path: &Path) -> Result<(), CliError> {
    let operation_id = parse_operation_id(id)?;
    let engine = open_local_engine(db_path).await?;
    let discarded = engine.conflicts().discard(&operation_id).await?;

    println!("Discarded {}", discarded.id);
    Ok(())
}

/// One line per failed operation, followed by the local record state and the
/// server copy returned with a conflict, when known.
pub fn format_failed_lines(failed: &[FailedOperation], now_ms: i64) -> Vec<String> {
    failed
        .iter()
        .flat_map(|entry| {
            let mut lines = format_operation_lines(std::slice::from_ref(&entry.operation), now_ms);
            match &entry.record {
                Some(record) => lines.push(format!(
                    "    record {} v{} [{}]",
                    record.id, record.version, record.sync_status
                )),
                None if entry.operation.record_id.is_some() => {
                    lines.push("    record missing locally".to_string());
                }
                None => {}
            }
            if let Some(server) = entry.server_state() {
                lines.push(format!("    server {server}"));
            }
            lines
        })
        .collect()
}
