pub mod common;
pub mod conflicts;
pub mod list;
pub mod queue;
pub mod record;
pub mod run;
pub mod set_status;
pub mod stats;
pub mod sync;
