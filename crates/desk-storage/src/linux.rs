//! Linux Secret Service implementation.

use crate::{EntryReader, EntryRemover, EntryWriter, StoreError, StoreResult};
use secret_service::{blocking::SecretService, EncryptionType};
use std::collections::HashMap;
use tracing::debug;

/// Secret Service based secure storage for Linux.
///
/// Secret Service has no "add unless present" primitive, so `put` searches
/// before creating. Two processes racing on the same subject can both pass the
/// search; within this process callers are expected to serialise writers.
pub struct SecretServiceStore {
    service_name: String,
}

impl SecretServiceStore {
    /// Create a new Secret Service store instance.
    pub fn new(service_name: &str) -> StoreResult<Self> {
        // Verify we can connect to Secret Service
        SecretService::connect(EncryptionType::Dh).map_err(|e| {
            StoreError::Unknown(format!("Failed to connect to Secret Service: {}", e))
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn with_collection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&secret_service::blocking::Collection) -> StoreResult<T>,
    {
        let ss = SecretService::connect(EncryptionType::Dh)
            .map_err(|e| StoreError::Unknown(e.to_string()))?;

        let collection = ss
            .get_default_collection()
            .map_err(|e| StoreError::Unknown(e.to_string()))?;

        if collection.is_locked().unwrap_or(false) {
            collection
                .unlock()
                .map_err(|e| StoreError::Unknown(format!("Failed to unlock collection: {}", e)))?;
        }

        f(&collection)
    }

    fn build_attributes<'a>(&'a self, subject: &'a str) -> HashMap<&'a str, &'a str> {
        let mut attrs = HashMap::new();
        attrs.insert("service", self.service_name.as_str());
        attrs.insert("subject", subject);
        attrs
    }
}

impl EntryWriter for SecretServiceStore {
    fn put(&self, subject: &str, value: &str) -> StoreResult<()> {
        debug!(service = %self.service_name, subject = %subject, "Adding secret");

        self.with_collection(|collection| {
            let existing = collection
                .search_items(self.build_attributes(subject))
                .map_err(|e| StoreError::Unknown(e.to_string()))?;
            if !existing.is_empty() {
                return Err(StoreError::DuplicateEntry(subject.to_string()));
            }

            let label = format!("{}/{}", self.service_name, subject);
            collection
                .create_item(
                    &label,
                    self.build_attributes(subject),
                    value.as_bytes(),
                    false, // never replace
                    "text/plain",
                )
                .map_err(|e| StoreError::Unknown(e.to_string()))?;

            Ok(())
        })
    }
}

impl EntryReader for SecretServiceStore {
    fn get(&self, subject: &str) -> StoreResult<String> {
        debug!(service = %self.service_name, subject = %subject, "Getting secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.build_attributes(subject))
                .map_err(|e| StoreError::Unknown(e.to_string()))?;

            let item = items
                .first()
                .ok_or_else(|| StoreError::MissingEntry(subject.to_string()))?;

            let secret = item
                .get_secret()
                .map_err(|e| StoreError::Unknown(e.to_string()))?;

            String::from_utf8(secret).map_err(|_| StoreError::MissingEntry(subject.to_string()))
        })
    }
}

impl EntryRemover for SecretServiceStore {
    fn delete(&self, subject: &str) -> StoreResult<()> {
        debug!(service = %self.service_name, subject = %subject, "Deleting secret");

        self.with_collection(|collection| {
            let items = collection
                .search_items(self.build_attributes(subject))
                .map_err(|e| StoreError::Unknown(e.to_string()))?;

            if items.is_empty() {
                return Err(StoreError::MissingEntry(subject.to_string()));
            }

            for item in &items {
                item.delete().map_err(|e| StoreError::Unknown(e.to_string()))?;
            }

            Ok(())
        })
    }
}
