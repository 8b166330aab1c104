use std::path::PathBuf;

use agrisync_core::models::{FailureKind, OperationStatus, OutgoingOperation, StoreStats};
use agrisync_core::sync::{DrainReport, FailedOperation};
use agrisync_core::{Collection, CollectionStatus, NewCollection, SyncStatus};
use clap::Parser;

use crate::cli::{Cli, Commands, ConflictCommands, QueueStatusArg, StatusArg, SyncStatusArg};
use crate::commands::common::{
    collection_to_list_item, format_collection_lines, format_drain_report,
    format_operation_lines, format_relative_time, format_stats_lines, parse_collection_id,
    parse_operation_id, resolve_db_path,
};
use crate::commands::conflicts::format_failed_lines;
use crate::commands::record::RecordArgs;
use crate::error::CliError;

const NOW_MS: i64 = 1_700_000_000_000;

fn sample_collection() -> Collection {
    Collection::create(
        NewCollection::new("farmer-9", "Maize", 12.5).with_price_per_kg(2.0),
        NOW_MS - 5 * 60_000,
    )
    .unwrap()
}

#[test]
fn relative_time_buckets() {
    assert_eq!(format_relative_time(NOW_MS, NOW_MS), "just now");
    assert_eq!(format_relative_time(NOW_MS - 59_000, NOW_MS), "just now");
    assert_eq!(format_relative_time(NOW_MS - 2 * 60_000, NOW_MS), "2m ago");
    assert_eq!(format_relative_time(NOW_MS - 3 * 3_600_000, NOW_MS), "3h ago");
    assert_eq!(format_relative_time(NOW_MS - 2 * 86_400_000, NOW_MS), "2d ago");
}

#[test]
fn relative_time_treats_future_timestamps_as_now() {
    assert_eq!(format_relative_time(NOW_MS + 10_000, NOW_MS), "just now");
}

#[test]
fn collection_lines_show_sync_state_and_version() {
    let collection = sample_collection();
    let lines = format_collection_lines(std::slice::from_ref(&collection), NOW_MS);

    assert_eq!(lines.len(), 1);
    assert_eq!(
        lines[0],
        format!(
            "{}  farmer-9 Maize 12.50kg  pending  [pending v1]  5m ago",
            collection.id
        )
    );
}

#[test]
fn list_item_carries_total_price() {
    let item = collection_to_list_item(&sample_collection());
    assert_eq!(item.farmer_id, "farmer-9");
    assert!((item.total_price - 25.0).abs() < f64::EPSILON);
    assert_eq!(item.sync_status, SyncStatus::Pending);
    assert_eq!(item.version, 1);
}

#[test]
fn operation_lines_include_failure_and_error() {
    let collection = sample_collection();
    let mut operation = OutgoingOperation::create_collection(&collection, NOW_MS);
    operation.status = OperationStatus::Failed;
    operation.attempts = 1;
    operation.failure = Some(FailureKind::Conflict);
    operation.last_error = Some("version conflict (HTTP 409)".to_string());

    let lines = format_operation_lines(&[operation.clone()], NOW_MS);
    assert_eq!(
        lines[0],
        format!(
            "{}  POST /collections  failed  attempts=1  just now  (conflict)  version conflict (HTTP 409)",
            operation.id
        )
    );
}

#[test]
fn failed_lines_append_local_record_state() {
    let collection = sample_collection();
    let operation = OutgoingOperation::create_collection(&collection, NOW_MS);
    let mut conflicted = operation.clone();
    conflicted.conflict_body = Some(serde_json::json!({"version": 3}));
    let failed = vec![
        FailedOperation {
            operation: conflicted,
            record: Some(collection.clone()),
        },
        FailedOperation {
            operation,
            record: None,
        },
    ];

    let lines = format_failed_lines(&failed, NOW_MS);
    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[1],
        format!("    record {} v1 [pending]", collection.id)
    );
    assert_eq!(lines[2], r#"    server {"version":3}"#);
    assert_eq!(lines[4], "    record missing locally");
}

#[test]
fn drain_report_summary() {
    assert_eq!(format_drain_report(&DrainReport::default()), "Queue is empty.");

    let report = DrainReport {
        claimed: 4,
        delivered: 2,
        conflicts: 1,
        rejected: 1,
        ..DrainReport::default()
    };
    assert_eq!(
        format_drain_report(&report),
        "Claimed 4: 2 delivered, 1 conflicts, 1 rejected, 0 exhausted, 0 internal"
    );

    let interrupted = DrainReport {
        claimed: 3,
        delivered: 1,
        abandoned: 2,
        ..DrainReport::default()
    };
    assert!(format_drain_report(&interrupted)
        .ends_with("(2 left for the next drain after the lease was lost)"));

    let skipped = DrainReport {
        skipped: true,
        ..DrainReport::default()
    };
    assert!(format_drain_report(&skipped).contains("already running"));
}

#[test]
fn stats_lines_sum_counts() {
    let stats = StoreStats {
        pending_records: 2,
        synced_records: 5,
        error_records: 1,
        pending_operations: 2,
        processing_operations: 0,
        failed_operations: 1,
    };
    assert_eq!(
        format_stats_lines(&stats),
        vec![
            "Records: 8 total (2 pending, 5 synced, 1 error)".to_string(),
            "Queue: 3 operations (2 pending, 0 processing, 1 failed)".to_string(),
        ]
    );
}

#[test]
fn explicit_db_path_wins() {
    let explicit = PathBuf::from("/tmp/agrisync-test.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
}

#[test]
fn ids_must_be_uuids() {
    let collection = sample_collection();
    let parsed = parse_collection_id(&format!("  {}  ", collection.id)).unwrap();
    assert_eq!(parsed, collection.id);

    assert!(matches!(
        parse_collection_id("not-an-id"),
        Err(CliError::InvalidId(_))
    ));
    assert!(matches!(parse_operation_id(""), Err(CliError::InvalidId(_))));
}

#[test]
fn value_enums_map_to_core_types() {
    assert_eq!(CollectionStatus::from(StatusArg::Verified), CollectionStatus::Verified);
    assert_eq!(SyncStatus::from(SyncStatusArg::Error), SyncStatus::Error);
    assert_eq!(
        OperationStatus::from(QueueStatusArg::Failed),
        OperationStatus::Failed
    );
}

#[test]
fn record_args_build_new_collection() {
    let input = NewCollection::from(RecordArgs {
        farmer: "farmer-1".to_string(),
        crop: "Coffee".to_string(),
        weight: 3.5,
        price: 4.0,
        collector: Some("collector-2".to_string()),
    });

    assert_eq!(input.farmer_id.as_deref(), Some("farmer-1"));
    assert_eq!(input.crop_type.as_deref(), Some("Coffee"));
    assert_eq!(input.weight_kg, Some(3.5));
    assert_eq!(input.price_per_kg, Some(4.0));
    assert_eq!(input.collector_id.as_deref(), Some("collector-2"));
    assert!(input.writer_id.is_none());
}

#[test]
fn cli_parses_record_with_global_db_path() {
    let cli = Cli::try_parse_from([
        "agrisync",
        "record",
        "farmer-1",
        "Maize",
        "12.5",
        "--price",
        "2",
        "--db-path",
        "/tmp/a.db",
    ])
    .unwrap();

    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/a.db")));
    match cli.command {
        Commands::Record {
            farmer,
            weight,
            price,
            collector,
            json,
            ..
        } => {
            assert_eq!(farmer, "farmer-1");
            assert!((weight - 12.5).abs() < f64::EPSILON);
            assert!((price - 2.0).abs() < f64::EPSILON);
            assert!(collector.is_none());
            assert!(!json);
        }
        _ => panic!("expected record command"),
    }
}

#[test]
fn cli_parses_conflict_subcommands() {
    let cli = Cli::try_parse_from(["agrisync", "conflicts", "retry", "abc"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Conflicts {
            command: ConflictCommands::Retry { ref id }
        } if id == "abc"
    ));

    let cli = Cli::try_parse_from(["agrisync", "set-status", "abc", "paid"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::SetStatus {
            status: StatusArg::Paid,
            ..
        }
    ));

    assert!(Cli::try_parse_from(["agrisync", "set-status", "abc", "shipped"]).is_err());
}
