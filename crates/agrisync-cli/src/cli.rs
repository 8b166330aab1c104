use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "agrisync")]
#[command(about = "Record produce collections offline and sync them when the server is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a new collection locally and queue it for upload
    #[command(alias = "add")]
    Record {
        /// Farmer the produce was collected from
        farmer: String,
        /// Crop type, e.g. "Maize"
        crop: String,
        /// Weight in kilograms
        weight: f64,
        /// Price per kilogram
        #[arg(long, default_value = "0")]
        price: f64,
        /// Collector identifier
        #[arg(long)]
        collector: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change the business status of a collection
    SetStatus {
        /// Collection ID
        id: String,
        /// New status
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// List recent collections
    List {
        /// Number of collections to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only show collections in this sync state
        #[arg(long, value_enum)]
        status: Option<SyncStatusArg>,
        /// Only show collections for this farmer
        #[arg(long)]
        farmer: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queued operations
    Queue {
        /// Only show operations in this state
        #[arg(long, value_enum)]
        status: Option<QueueStatusArg>,
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a single drain of the outgoing queue
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Run,
    /// Show record and queue counts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve failed operations
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List failed operations
    List {
        /// Number of operations to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a failed operation back in the queue
    Retry {
        /// Operation ID
        id: String,
    },
    /// Fetch the server's copy of the targeted record
    Inspect {
        /// Operation ID
        id: String,
    },
    /// Drop a failed operation, keeping the local record
    Discard {
        /// Operation ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Verified,
    Paid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SyncStatusArg {
    Pending,
    Synced,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueStatusArg {
    Pending,
    Processing,
    Failed,
}
