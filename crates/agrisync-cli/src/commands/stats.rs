use std::path::Path;

use crate::commands::common::{format_stats_lines, open_database};
use crate::error::CliError;

pub async fn run_stats(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let stats = db.stats().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_stats_lines(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}
