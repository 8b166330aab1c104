use std::path::Path;

use agrisync_core::{Collection, SyncStatus};
use chrono::Utc;

use crate::commands::common::{
    collection_to_list_item, format_collection_lines, open_database, CollectionListItem,
};
use crate::error::CliError;

pub async fn list_collections(
    limit: usize,
    status: Option<SyncStatus>,
    farmer: Option<&str>,
    db_path: &Path,
) -> Result<Vec<Collection>, CliError> {
    let db = open_database(db_path).await?;
    let collections = match (status, farmer) {
        (_, Some(farmer)) => db.list_collections_by_farmer(farmer, status, limit).await?,
        (Some(status), None) => db.list_collections_by_status(status, limit).await?,
        (None, None) => db.list_collections(limit, 0).await?,
    };
    Ok(collections)
}

pub async fn run_list(
    limit: usize,
    status: Option<SyncStatus>,
    farmer: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let collections = list_collections(limit, status, farmer, db_path).await?;

    if as_json {
        let json_items = collections
            .iter()
            .map(collection_to_list_item)
            .collect::<Vec<CollectionListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if collections.is_empty() {
        println!("No collections recorded.");
        return Ok(());
    }

    for line in format_collection_lines(&collections, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}
