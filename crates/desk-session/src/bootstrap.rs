//! Cold-start check for a resumable session.

use crate::codec::SnapshotCodec;
use crate::snapshot::{CredentialSnapshot, EndpointSnapshot, Snapshot};
use crate::BootstrapError;
use desk_storage::{EntryReader, SecureKeyValueStore, StoreSubjects};
use std::sync::Arc;
use tracing::{debug, info};

/// Decides at startup whether a persisted session can be resumed or the
/// user has to enroll again.
///
/// Only reads the store. Nothing is written or deleted, whatever the outcome.
pub struct BootstrapVerifier<R: ?Sized = dyn SecureKeyValueStore> {
    reader: Arc<R>,
}

impl<R: EntryReader + ?Sized> BootstrapVerifier<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self { reader }
    }

    /// Decode the identity and endpoint snapshots. Both must be present and
    /// well-formed. The identity is checked first and its failure is
    /// reported without reading the endpoint.
    pub fn verify_bootstrapped(
        &self,
    ) -> Result<(CredentialSnapshot, EndpointSnapshot), BootstrapError> {
        let identity = self.load::<CredentialSnapshot>(StoreSubjects::SESSION_IDENTITY)?;
        let endpoint = self.load::<EndpointSnapshot>(StoreSubjects::NETWORKING_CLIENT)?;

        info!(
            identity_snapshot = %identity.meta.id,
            endpoint_snapshot = %endpoint.meta.id,
            "Persisted session verified"
        );
        Ok((identity, endpoint))
    }

    pub fn is_resumable(&self) -> bool {
        self.verify_bootstrapped().is_ok()
    }

    fn load<S: Snapshot>(&self, subject: &str) -> Result<S, BootstrapError> {
        let outcome = self
            .reader
            .get(subject)
            .map_err(Into::into)
            .and_then(|text| SnapshotCodec::<S>::new().decode(&text));

        outcome.map_err(|error| {
            let error = BootstrapError::classify(subject, error);
            debug!(subject = %subject, error = %error, "Bootstrap check failed");
            error
        })
    }
}
