//! Conflict records and resolution choices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tillsync_store::{EntityType, StoredEntity};

/// An entity whose remote copy moved ahead of the local one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub id: String,
    /// Local payload at the time of listing.
    pub local_payload: Value,
    /// Remote record, when it could be fetched.
    pub remote_payload: Option<Value>,
    /// Local version.
    pub local_version: u64,
    /// Last remote version the local copy was based on.
    pub remote_version: u64,
    /// When the conflict was recorded.
    pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Builds a record from a conflicted entity.
    pub fn from_entity(entity: &StoredEntity) -> Self {
        Self {
            entity_type: entity.entity_type,
            id: entity.id.clone(),
            local_payload: entity.payload.clone(),
            remote_payload: None,
            local_version: entity.local_version,
            remote_version: entity.remote_version,
            detected_at: entity.last_modified,
        }
    }

    /// Attaches the remote record.
    pub fn with_remote(mut self, remote: Option<Value>) -> Self {
        self.remote_payload = remote;
        self
    }
}

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Push the local payload over the remote record.
    #[serde(rename = "local")]
    KeepLocal,
    /// Accept the remote record; the local push is dropped.
    #[serde(rename = "remote")]
    KeepRemote,
}

impl ConflictResolution {
    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictResolution::KeepLocal => "local",
            ConflictResolution::KeepRemote => "remote",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ConflictResolution::KeepLocal),
            "remote" => Ok(ConflictResolution::KeepRemote),
            other => Err(format!("unknown conflict resolution: {other}")),
        }
    }
}
