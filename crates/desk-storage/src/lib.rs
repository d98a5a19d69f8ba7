//! Secure key-value storage for the service desk client.
//!
//! This crate provides platform-specific secure storage implementations:
//! - **macOS**: Keychain Services via `security-framework`
//! - **Linux**: Secret Service (GNOME Keyring / KWallet) via `secret-service`
//! - **Windows**: Credential Vault via `windows` crate
//!
//! Every backend follows the same write policy: `put` never overwrites. A
//! caller that wants to replace an entry must `delete` it first, otherwise the
//! write fails with [`StoreError::DuplicateEntry`].

mod keys;
mod memory;
mod traits;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

pub use keys::StoreSubjects;
pub use memory::MemoryStore;
pub use traits::{EntryReader, EntryRemover, EntryWriter, SecureKeyValueStore};

use thiserror::Error;

/// Service name used for all keychain entries written by the client.
pub const SERVICE_NAME: &str = "app.servicedesk.client";

/// Error type for secure store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No entry exists for the subject (or its payload is not UTF-8 text).
    #[error("No entry for subject: {0}")]
    MissingEntry(String),

    /// An entry already exists for the subject and was not deleted first.
    #[error("Entry already exists for subject: {0}")]
    DuplicateEntry(String),

    /// The platform returned data of an unexpected type.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The platform rejected the query parameters.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Platform failure with no finer classification.
    #[error("Unknown storage failure: {0}")]
    Unknown(String),
}

impl StoreError {
    /// Returns true if this error only means "nothing stored under that subject".
    pub fn is_missing(&self) -> bool {
        matches!(self, StoreError::MissingEntry(_))
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Create the default platform-specific store for the given service name.
pub fn create_store(service_name: &str) -> StoreResult<Box<dyn SecureKeyValueStore>> {
    #[cfg(target_os = "macos")]
    {
        let store = macos::KeychainStore::new(service_name)?;
        Ok(Box::new(store))
    }

    #[cfg(target_os = "linux")]
    {
        let store = linux::SecretServiceStore::new(service_name)?;
        Ok(Box::new(store))
    }

    #[cfg(target_os = "windows")]
    {
        let store = windows::CredentialVaultStore::new(service_name)?;
        Ok(Box::new(store))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        Err(StoreError::Unknown(format!(
            "No secure storage implementation available for this platform (service {})",
            service_name
        )))
    }
}
