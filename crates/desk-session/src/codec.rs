//! Text encoding for snapshots: JSON wrapped in standard base64.

use crate::snapshot::{CredentialSnapshot, EndpointSnapshot, Snapshot};
use crate::{CredentialError, CredentialResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use std::marker::PhantomData;

/// Encodes and decodes one snapshot type to the text stored in the
/// secure store.
pub struct SnapshotCodec<S> {
    _marker: PhantomData<fn() -> S>,
}

/// Codec for the session identity snapshot.
pub type CredentialSnapshotCodec = SnapshotCodec<CredentialSnapshot>;

/// Codec for the networking client snapshot.
pub type EndpointSnapshotCodec = SnapshotCodec<EndpointSnapshot>;

impl<S: Snapshot> SnapshotCodec<S> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Serialize `snapshot` to JSON and wrap it in base64.
    pub fn encode(&self, snapshot: &S) -> CredentialResult<String> {
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| CredentialError::EncodeFailure(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Reverse of [`encode`](Self::encode).
    ///
    /// Text that is not base64 or not UTF-8 yields `InvalidEntry`. JSON that
    /// does not match `S`, carries a different schema version, or fails
    /// [`Snapshot::validate`] yields `DecodeFailure`. A missing schema
    /// version is accepted.
    pub fn decode(&self, text: &str) -> CredentialResult<S> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| CredentialError::InvalidEntry(format!("not base64: {}", e)))?;
        let json = std::str::from_utf8(&bytes)
            .map_err(|e| CredentialError::InvalidEntry(format!("not UTF-8: {}", e)))?;

        let snapshot: S =
            serde_json::from_str(json).map_err(|e| CredentialError::DecodeFailure(e.to_string()))?;

        if let Some(version) = snapshot.metadata().schema_version.as_deref() {
            if version != S::SCHEMA_VERSION {
                return Err(CredentialError::DecodeFailure(format!(
                    "schema version {} does not match {}",
                    version,
                    S::SCHEMA_VERSION
                )));
            }
        }
        snapshot.validate().map_err(CredentialError::DecodeFailure)?;

        Ok(snapshot)
    }
}

impl<S: Snapshot> Default for SnapshotCodec<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for SnapshotCodec<S> {
    fn clone(&self) -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<S> fmt::Debug for SnapshotCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotCodec")
            .field("snapshot", &std::any::type_name::<S>())
            .finish()
    }
}
