use std::path::Path;

use crate::commands::common::{format_drain_report, open_network_engine};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let (engine, _) = open_network_engine(db_path).await?;
    // Skipped while another process holds the drain lease on this database
    let report = engine.process_once().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_drain_report(&report));
    }
    Ok(())
}
