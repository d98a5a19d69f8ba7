//! Snapshot data model shared by the codec, the memento agent, and bootstrap.

use crate::CredentialResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Tag written after a successful code exchange.
pub const POST_SUBMIT_TAG: &str = "post-submit";
/// Tag written after a successful token renewal.
pub const POST_REFRESH_TAG: &str = "post-refresh";
/// Tag written after the service endpoint is enrolled.
pub const POST_ENROLL_TAG: &str = "post-enroll";

/// Provenance fields carried by every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Fresh per capture.
    pub id: Uuid,
    /// Free-form label such as `post-refresh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Capture time.
    pub taken_on: DateTime<Utc>,
    /// Schema version of the snapshot type at capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl SnapshotMetadata {
    /// Metadata for a capture happening now.
    pub fn stamp(tag: Option<&str>, schema_version: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tag: tag.map(str::to_string),
            taken_on: Utc::now(),
            schema_version: Some(schema_version.to_string()),
        }
    }
}

/// A serializable, immutable capture of some state.
pub trait Snapshot: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Version written into new snapshots and checked on decode.
    const SCHEMA_VERSION: &'static str;

    fn metadata(&self) -> &SnapshotMetadata;

    fn metadata_mut(&mut self) -> &mut SnapshotMetadata;

    /// Check field invariants serde cannot express. Decoding fails with the
    /// returned reason.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// State that can be captured into and restored from a snapshot of type `S`.
pub trait Snapshotable<S: Snapshot>: Send + Sync {
    /// Capture the current state, failing with `UnloadedEntry` when a
    /// required field is not populated.
    fn capture_snapshot(&self) -> CredentialResult<S>;

    /// Replace the current state with the snapshot's values, failing with
    /// `RejectedSnapshot` when they are not acceptable.
    fn restore_snapshot(&self, snapshot: &S) -> CredentialResult<()>;
}

/// Authorization role granted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Crew,
    Management,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Crew => "crew",
            Role::Management => "management",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work area the user is qualified for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
    pub id: String,
    pub name: String,
    /// Service-level target for tickets in this area, in hours.
    pub service_level_agreement_duration_hour: u32,
}

/// Persisted form of the session credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSnapshot {
    #[serde(flatten)]
    pub meta: SnapshotMetadata,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub role: Role,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub specialties: Vec<Specialty>,
}

impl CredentialSnapshot {
    /// A snapshot is worth resuming only while its refresh token outlives
    /// both the capture and `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at > self.meta.taken_on && self.refresh_token_expires_at > now
    }
}

impl Snapshot for CredentialSnapshot {
    const SCHEMA_VERSION: &'static str = "1";

    fn metadata(&self) -> &SnapshotMetadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut SnapshotMetadata {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), String> {
        if self.access_token.is_empty() {
            return Err("access token is empty".to_string());
        }
        if self.refresh_token.is_empty() {
            return Err("refresh token is empty".to_string());
        }
        Ok(())
    }
}

/// Persisted form of the enrolled service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    #[serde(flatten)]
    pub meta: SnapshotMetadata,
    pub base_url: String,
}

impl Snapshot for EndpointSnapshot {
    const SCHEMA_VERSION: &'static str = "1";

    fn metadata(&self) -> &SnapshotMetadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut SnapshotMetadata {
        &mut self.meta
    }
}
