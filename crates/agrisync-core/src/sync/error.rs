//! Delivery failure taxonomy.

use serde::Deserialize;
use thiserror::Error;

use crate::models::FailureKind;
use crate::util::compact_text;

/// Result type for delivery operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why delivering an operation did not succeed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, 5xx or 429. Worth retrying.
    #[error("transient failure: {0}")]
    TransientNetwork(String),

    /// 4xx other than 409 and 429. Retrying will not help.
    #[error("rejected by server: {message}")]
    PermanentRejection { status: u16, message: String },

    /// 409: the server holds a different version of the record.
    #[error("version conflict: {message}")]
    VersionConflict {
        message: String,
        /// Server's current copy, when it sent one
        current: Option<serde_json::Value>,
    },

    /// The local store failed while recording a delivery outcome.
    #[error("local store unavailable: {0}")]
    StoreUnavailable(#[from] crate::Error),

    /// Transient failures used up every attempt.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// A status code outside the known classes (1xx, 3xx).
    #[error("unexpected response: HTTP {status}")]
    Unclassified { status: u16 },
}

impl SyncError {
    /// Classify an HTTP status. `None` means the request was accepted.
    pub fn from_response(status: u16, body: Option<&serde_json::Value>) -> Option<Self> {
        match status {
            200..=299 => None,
            409 => Some(Self::VersionConflict {
                message: api_error_message(status, body),
                current: body.and_then(|body| body.get("current")).cloned(),
            }),
            429 | 500..=599 => Some(Self::TransientNetwork(api_error_message(status, body))),
            400..=499 => Some(Self::PermanentRejection {
                status,
                message: api_error_message(status, body),
            }),
            _ => Some(Self::Unclassified { status }),
        }
    }

    /// Returns true if this error can be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Failure marker recorded on the operation.
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::VersionConflict { .. } => FailureKind::Conflict,
            Self::PermanentRejection { .. } => FailureKind::Rejected,
            Self::TransientNetwork(_) | Self::RetriesExhausted { .. } => FailureKind::Exhausted,
            Self::StoreUnavailable(_) | Self::Unclassified { .. } => FailureKind::Internal,
        }
    }

    /// Server copy carried by a version conflict.
    pub fn server_state(&self) -> Option<&serde_json::Value> {
        match self {
            Self::VersionConflict { current, .. } => current.as_ref(),
            _ => None,
        }
    }

    /// Whether the record the operation describes moves to `error`.
    pub const fn marks_record_error(&self) -> bool {
        matches!(
            self,
            Self::PermanentRejection { .. } | Self::RetriesExhausted { .. }
        )
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Extract a short message from an API error payload.
pub(crate) fn api_error_message(status: u16, body: Option<&serde_json::Value>) -> String {
    let Some(body) = body else {
        return format!("HTTP {status}");
    };

    if let Ok(payload) = serde_json::from_value::<ApiErrorBody>(body.clone()) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} (HTTP {status})", compact_text(&message));
        }
    }

    match body {
        serde_json::Value::String(text) if !text.trim().is_empty() => {
            format!("{} (HTTP {status})", compact_text(text))
        }
        _ => format!("HTTP {status}"),
    }
}
