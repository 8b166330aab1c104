//! Store statistics

use serde::{Deserialize, Serialize};

/// Row counts by state, used for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub pending_records: u64,
    pub synced_records: u64,
    pub error_records: u64,
    pub pending_operations: u64,
    pub processing_operations: u64,
    pub failed_operations: u64,
}

impl StoreStats {
    /// Operations still waiting for delivery or an operator.
    pub const fn queue_depth(&self) -> u64 {
        self.pending_operations + self.processing_operations + self.failed_operations
    }

    pub const fn total_records(&self) -> u64 {
        self.pending_records + self.synced_records + self.error_records
    }
}
