//! Outgoing operation delivery: dispatcher, scheduling and conflict handling.

mod backoff;
mod conflicts;
mod connectivity;
mod dispatcher;
mod engine;
mod error;
mod scheduler;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use backoff::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};
pub use conflicts::{ConflictError, ConflictResult, ConflictSurface, FailedOperation, ServerSnapshot};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use dispatcher::{DeliveryOutcome, Dispatcher, DrainReport, DEFAULT_BATCH_SIZE};
pub use engine::{CollectionReceipt, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use scheduler::{Scheduler, SchedulerHandle, DEFAULT_TICK_INTERVAL};
pub use transport::{
    CredentialProvider, HttpTransport, OutboundRequest, StaticCredentials, Transport,
    TransportResponse,
};
