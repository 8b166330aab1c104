use std::path::Path;

use agrisync_core::sync::{Connectivity, ConnectivityMonitor};

use crate::commands::common::open_network_engine;
use crate::error::CliError;

/// Run the scheduler with a reachability monitor until Ctrl-C.
pub async fn run_daemon(db_path: &Path) -> Result<(), CliError> {
    let (engine, transport) = open_network_engine(db_path).await?;
    let monitor = ConnectivityMonitor::spawn(
        transport,
        engine.settings().probe_interval,
        Connectivity::Online,
    );
    let handle = engine.start(Some(monitor.subscribe()));
    let mut state = handle.state();

    println!("Syncing to {}. Press Ctrl-C to stop.", engine.settings().require_api_base_url()?);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                tracing::info!(state = %current, "Sync state changed");
            }
        }
    }

    tracing::info!("Shutting down");
    handle.shutdown().await;
    drop(monitor);
    Ok(())
}
