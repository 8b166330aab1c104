use std::path::Path;

use agrisync_core::CollectionStatus;

use crate::commands::common::{open_local_engine, parse_collection_id};
use crate::error::CliError;

pub async fn run_set_status(
    id: &str,
    status: CollectionStatus,
    db_path: &Path,
) -> Result<(), CliError> {
    let collection_id = parse_collection_id(id)?;
    let engine = open_local_engine(db_path).await?;
    let receipt = engine
        .update_collection_status(&collection_id, status)
        .await?;

    let collection = &receipt.collection;
    println!(
        "{} -> {} (v{}, queued {})",
        collection.id, collection.status, collection.version, receipt.operation_id
    );
    Ok(())
}
