//! Sync state published by the scheduler.

use serde::Serialize;

/// What the background scheduler is doing, for status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No drain running and the last one left nothing failed
    #[default]
    Idle,
    Syncing,
    /// The connectivity signal reports no server
    Offline,
    /// The last drain failed or parked operations for an operator
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
