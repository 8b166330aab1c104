//! Collection model
//!
//! A collection is one weighed and priced delivery of produce from a farmer to
//! a collector. It is recorded locally first and synchronized later.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::{non_negative, normalize_text_option};

/// Writer id used when the caller does not supply one.
pub const DEFAULT_WRITER_ID: &str = "local";

/// A unique identifier for a collection, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(Uuid);

impl CollectionId {
    /// Create a new unique collection ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Local synchronization state of a collection.
///
/// `Pending` records wait for the dispatcher, `Synced` records were
/// acknowledged by the server at their current version, and `Error` records
/// were permanently rejected and need an operator to retry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Business lifecycle of a collection as the server tracks it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    #[default]
    Pending,
    Verified,
    Paid,
}

impl CollectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "paid" => Ok(Self::Paid),
            other => Err(Error::InvalidInput(format!(
                "unknown collection status '{other}'"
            ))),
        }
    }
}

/// Unvalidated input for a new collection, as captured by a form or scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCollection {
    pub farmer_id: Option<String>,
    pub collector_id: Option<String>,
    pub crop_type: Option<String>,
    pub weight_kg: Option<f64>,
    pub price_per_kg: Option<f64>,
    pub writer_id: Option<String>,
}

impl NewCollection {
    /// Convenience constructor for the required fields.
    pub fn new(farmer_id: impl Into<String>, crop_type: impl Into<String>, weight_kg: f64) -> Self {
        Self {
            farmer_id: Some(farmer_id.into()),
            crop_type: Some(crop_type.into()),
            weight_kg: Some(weight_kg),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_price_per_kg(mut self, price_per_kg: f64) -> Self {
        self.price_per_kg = Some(price_per_kg);
        self
    }

    #[must_use]
    pub fn with_collector(mut self, collector_id: impl Into<String>) -> Self {
        self.collector_id = Some(collector_id.into());
        self
    }
}

/// A collection record in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Client-generated identifier, stable across sync
    pub id: CollectionId,
    pub farmer_id: String,
    /// Empty when the collector is not known locally
    pub collector_id: String,
    pub crop_type: String,
    pub weight_kg: f64,
    pub price_per_kg: f64,
    pub status: CollectionStatus,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Optimistic-concurrency version, never decreases
    pub version: i64,
    pub sync_status: SyncStatus,
    pub writer_id: String,
    /// Last write timestamp by `writer_id` (Unix ms)
    pub last_writer_at: i64,
}

impl Collection {
    /// Validate input and build a pending record at version 1.
    ///
    /// Farmer and crop are required. Weight and price are clamped to
    /// non-negative finite values.
    pub fn create(input: NewCollection, now_ms: i64) -> Result<Self> {
        let farmer_id = normalize_text_option(input.farmer_id)
            .ok_or_else(|| Error::validation("farmer_id", "is required"))?;
        let crop_type = normalize_text_option(input.crop_type)
            .ok_or_else(|| Error::validation("crop_type", "is required"))?;
        let writer_id = normalize_text_option(input.writer_id)
            .unwrap_or_else(|| DEFAULT_WRITER_ID.to_string());

        Ok(Self {
            id: CollectionId::new(),
            farmer_id,
            collector_id: normalize_text_option(input.collector_id).unwrap_or_default(),
            crop_type,
            weight_kg: non_negative(input.weight_kg.unwrap_or_default()),
            price_per_kg: non_negative(input.price_per_kg.unwrap_or_default()),
            status: CollectionStatus::Pending,
            created_at: now_ms,
            updated_at: now_ms,
            version: 1,
            sync_status: SyncStatus::Pending,
            writer_id,
            last_writer_at: now_ms,
        })
    }

    /// Total amount owed for this collection.
    #[must_use]
    pub fn total_price(&self) -> f64 {
        self.weight_kg * self.price_per_kg
    }

    /// Apply a local mutation: bump the version and stamp provenance.
    pub fn touch(&mut self, writer_id: &str, now_ms: i64) {
        self.version += 1;
        self.updated_at = now_ms.max(self.updated_at);
        self.writer_id = writer_id.to_string();
        self.last_writer_at = self.updated_at;
    }

    /// JSON body for the create call, in the server's field naming.
    #[must_use]
    pub fn create_body(&self) -> serde_json::Value {
        json!({
            "id": self.id.as_str(),
            "farmer_id": self.farmer_id,
            "collector_id": self.collector_id,
            "crop_type": self.crop_type,
            "weight_kg": self.weight_kg,
            "price_per_kg": self.price_per_kg,
            "status": self.status.as_str(),
            "version": self.version,
            "writer_id": self.writer_id,
            "last_writer_at": self.last_writer_at,
        })
    }

    /// JSON body for the status patch call.
    #[must_use]
    pub fn status_body(&self) -> serde_json::Value {
        json!({
            "status": self.status.as_str(),
            "version": self.version,
            "writer_id": self.writer_id,
            "last_writer_at": self.last_writer_at,
        })
    }
}
