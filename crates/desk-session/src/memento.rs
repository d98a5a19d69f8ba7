//! Snapshot persistence for a single store subject.

use crate::codec::SnapshotCodec;
use crate::snapshot::{Snapshot, SnapshotMetadata, Snapshotable};
use crate::CredentialResult;
use desk_storage::SecureKeyValueStore;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Captures a target's state into the secure store and restores it back.
///
/// The agent is the only writer that replaces an existing entry: it deletes
/// the subject and then adds the new value, so the store's own put never
/// has to overwrite.
pub struct MementoAgent<T, S> {
    store: Arc<dyn SecureKeyValueStore>,
    subject: String,
    codec: SnapshotCodec<S>,
    _target: PhantomData<fn(&T)>,
}

impl<T, S> MementoAgent<T, S>
where
    T: Snapshotable<S>,
    S: Snapshot,
{
    pub fn new(store: Arc<dyn SecureKeyValueStore>, subject: impl Into<String>) -> Self {
        Self {
            store,
            subject: subject.into(),
            codec: SnapshotCodec::new(),
            _target: PhantomData,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Capture `target`, stamp fresh metadata, and persist it.
    ///
    /// Nothing is written when capture fails.
    pub fn take_snapshot(&self, target: &T, tag: Option<&str>) -> CredentialResult<S> {
        let mut snapshot = target.capture_snapshot()?;
        *snapshot.metadata_mut() = SnapshotMetadata::stamp(tag, S::SCHEMA_VERSION);

        let encoded = self.codec.encode(&snapshot)?;
        self.replace_entry(&encoded)?;

        debug!(
            subject = %self.subject,
            snapshot_id = %snapshot.metadata().id,
            tag = ?tag,
            "Snapshot persisted"
        );
        Ok(snapshot)
    }

    /// Read and decode the persisted snapshot without touching any target.
    pub fn peek(&self) -> CredentialResult<S> {
        let text = self.store.get(&self.subject)?;
        self.codec.decode(&text)
    }

    /// Load the persisted snapshot into `target`.
    pub fn restore(&self, target: &T) -> CredentialResult<S> {
        let snapshot = self.peek()?;
        target.restore_snapshot(&snapshot)?;

        info!(
            subject = %self.subject,
            snapshot_id = %snapshot.metadata().id,
            "Snapshot restored"
        );
        Ok(snapshot)
    }

    /// Delete the persisted snapshot. Returns false if there was none.
    pub fn discard(&self) -> CredentialResult<bool> {
        match self.store.delete(&self.subject) {
            Ok(()) => {
                debug!(subject = %self.subject, "Snapshot discarded");
                Ok(true)
            }
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn replace_entry(&self, encoded: &str) -> CredentialResult<()> {
        match self.store.delete(&self.subject) {
            Ok(()) => {}
            Err(e) if e.is_missing() => {}
            Err(e) => return Err(e.into()),
        }
        self.store.put(&self.subject, encoded)?;
        Ok(())
    }
}
