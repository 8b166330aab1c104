//! AgriSync CLI - record collections in the field and sync them later
//!
//! Every write lands in the local database first; `sync` and `run` push the
//! queued operations to the server.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, ConflictCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::conflicts::{
    run_conflicts_discard, run_conflicts_inspect, run_conflicts_list, run_conflicts_retry,
};
use crate::commands::list::run_list;
use crate::commands::queue::run_queue;
use crate::commands::record::{run_record, RecordArgs};
use crate::commands::run::run_daemon;
use crate::commands::set_status::run_set_status;
use crate::commands::stats::run_stats;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agrisync=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Record {
            farmer,
            crop,
            weight,
            price,
            collector,
            json,
        } => {
            let args = RecordArgs {
                farmer,
                crop,
                weight,
                price,
                collector,
            };
            run_record(args, json, &db_path).await?;
        }
        Commands::SetStatus { id, status } => {
            run_set_status(&id, status.into(), &db_path).await?;
        }
        Commands::List {
            limit,
            status,
            farmer,
            json,
        } => {
            run_list(limit, status.map(Into::into), farmer.as_deref(), json, &db_path).await?;
        }
        Commands::Queue {
            status,
            limit,
            json,
        } => run_queue(status.map(Into::into), limit, json, &db_path).await?,
        Commands::Sync { json } => run_sync(json, &db_path).await?,
        Commands::Run => run_daemon(&db_path).await?,
        Commands::Stats { json } => run_stats(json, &db_path).await?,
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { limit, json } => {
                run_conflicts_list(limit, json, &db_path).await?;
            }
            ConflictCommands::Retry { id } => run_conflicts_retry(&id, &db_path).await?,
            ConflictCommands::Inspect { id } => run_conflicts_inspect(&id, &db_path).await?,
            ConflictCommands::Discard { id } => run_conflicts_discard(&id, &db_path).await?,
        },
    }

    Ok(())
}
