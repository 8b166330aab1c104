use std::path::Path;

use agrisync_core::models::OperationStatus;
use chrono::Utc;

use crate::commands::common::{format_operation_lines, open_database};
use crate::error::CliError;

pub async fn run_queue(
    status: Option<OperationStatus>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let operations = db.list_operations(status, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}
