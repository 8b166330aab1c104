//! Outgoing operation model
//!
//! An outgoing operation is one network mutation waiting to be replayed
//! against the server. Operations reference collections by id only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::collection::{Collection, CollectionId};
use crate::error::{Error, Result};

/// Unique identifier for a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Queue state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
    Done,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "done" => Ok(Self::Done),
            other => Err(Error::InvalidInput(format!(
                "unknown operation status '{other}'"
            ))),
        }
    }
}

/// Why an operation ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Server reported a version conflict (409)
    Conflict,
    /// Server permanently rejected the mutation (4xx)
    Rejected,
    /// Transient failures used up every attempt
    Exhausted,
    /// Unclassifiable response or local failure during delivery
    Internal,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
            Self::Exhausted => "exhausted",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conflict" => Ok(Self::Conflict),
            "rejected" => Ok(Self::Rejected),
            "exhausted" => Ok(Self::Exhausted),
            "internal" => Ok(Self::Internal),
            other => Err(Error::InvalidInput(format!("unknown failure kind '{other}'"))),
        }
    }
}

/// HTTP method of a replayed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unsupported method '{other}'"))),
        }
    }
}

/// A queued network mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingOperation {
    pub id: OperationId,
    /// Collection this operation describes, if any
    pub record_id: Option<CollectionId>,
    /// Collection version carried in the body
    pub record_version: Option<i64>,
    pub method: HttpMethod,
    /// Path relative to the API base URL, always starting with `/`
    pub target: String,
    pub body: Option<serde_json::Value>,
    /// Delivery attempts made so far
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Server state returned with a version conflict
    pub conflict_body: Option<serde_json::Value>,
    pub status: OperationStatus,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    pub updated_at: i64,
}

impl OutgoingOperation {
    /// Build a fresh pending operation.
    pub fn new(
        method: HttpMethod,
        target: impl Into<String>,
        body: Option<serde_json::Value>,
        now_ms: i64,
    ) -> Self {
        let target = target.into();
        let target = if target.starts_with('/') {
            target
        } else {
            format!("/{target}")
        };

        Self {
            id: OperationId::new(),
            record_id: None,
            record_version: None,
            method,
            target,
            body,
            attempts: 0,
            last_error: None,
            failure: None,
            conflict_body: None,
            status: OperationStatus::Pending,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Link this operation to the collection version it carries.
    #[must_use]
    pub const fn for_record(mut self, record_id: CollectionId, version: i64) -> Self {
        self.record_id = Some(record_id);
        self.record_version = Some(version);
        self
    }

    /// `POST /collections` for a newly recorded collection.
    pub fn create_collection(record: &Collection, now_ms: i64) -> Self {
        Self::new(
            HttpMethod::Post,
            "/collections",
            Some(record.create_body()),
            now_ms,
        )
        .for_record(record.id, record.version)
    }

    /// `PATCH /collections/{id}/status` carrying the record's current version.
    pub fn update_collection_status(record: &Collection, now_ms: i64) -> Self {
        Self::new(
            HttpMethod::Patch,
            format!("/collections/{}/status", record.id),
            Some(record.status_body()),
            now_ms,
        )
        .for_record(record.id, record.version)
    }

    /// Path used to read the server's copy of the resource this operation targets.
    #[must_use]
    pub fn resource_path(&self) -> String {
        match (self.method, self.record_id) {
            (HttpMethod::Post, Some(record_id)) => format!("{}/{record_id}", self.target),
            _ => self
                .target
                .strip_suffix("/status")
                .unwrap_or(&self.target)
                .to_string(),
        }
    }
}
