//! Windows Credential Vault implementation.

use crate::{EntryReader, EntryRemover, EntryWriter, StoreError, StoreResult};
use tracing::debug;
use windows::{
    core::HSTRING,
    Security::Credentials::{PasswordCredential, PasswordVault},
};

/// HRESULT for ERROR_NOT_FOUND as surfaced by `PasswordVault::Retrieve`.
const HRESULT_NOT_FOUND: u32 = 0x8007_0490;

/// Credential Vault based secure storage for Windows.
pub struct CredentialVaultStore {
    resource_name: String,
}

impl CredentialVaultStore {
    /// Create a new Credential Vault store instance.
    pub fn new(service_name: &str) -> StoreResult<Self> {
        // Verify we can access the vault
        PasswordVault::new().map_err(|e| {
            StoreError::Unknown(format!("Failed to access Credential Vault: {}", e))
        })?;

        Ok(Self {
            resource_name: service_name.to_string(),
        })
    }

    fn vault(&self) -> StoreResult<PasswordVault> {
        PasswordVault::new()
            .map_err(|e| StoreError::Unknown(format!("Failed to access Credential Vault: {}", e)))
    }

    /// Look up the credential for `subject`, mapping "not found" to `MissingEntry`.
    fn retrieve(&self, vault: &PasswordVault, subject: &str) -> StoreResult<PasswordCredential> {
        let resource = HSTRING::from(&self.resource_name);
        let user_name = HSTRING::from(subject);

        vault.Retrieve(&resource, &user_name).map_err(|e| {
            if e.code().0 as u32 == HRESULT_NOT_FOUND {
                StoreError::MissingEntry(subject.to_string())
            } else {
                StoreError::Unknown(format!("Failed to retrieve credential: {}", e))
            }
        })
    }
}

impl EntryWriter for CredentialVaultStore {
    fn put(&self, subject: &str, value: &str) -> StoreResult<()> {
        debug!(resource = %self.resource_name, subject = %subject, "Adding credential");

        let vault = self.vault()?;
        match self.retrieve(&vault, subject) {
            Ok(_) => return Err(StoreError::DuplicateEntry(subject.to_string())),
            Err(e) if e.is_missing() => {}
            Err(e) => return Err(e),
        }

        let credential = PasswordCredential::CreatePasswordCredential(
            &HSTRING::from(&self.resource_name),
            &HSTRING::from(subject),
            &HSTRING::from(value),
        )
        .map_err(|e| StoreError::Unknown(format!("Failed to create credential: {}", e)))?;

        vault
            .Add(&credential)
            .map_err(|e| StoreError::Unknown(format!("Failed to add credential: {}", e)))
    }
}

impl EntryReader for CredentialVaultStore {
    fn get(&self, subject: &str) -> StoreResult<String> {
        debug!(resource = %self.resource_name, subject = %subject, "Getting credential");

        let vault = self.vault()?;
        let credential = self.retrieve(&vault, subject)?;

        // RetrievePassword populates the Password field
        credential
            .RetrievePassword()
            .map_err(|e| StoreError::Unknown(format!("Failed to retrieve password: {}", e)))?;

        let password = credential
            .Password()
            .map_err(|e| StoreError::Unknown(format!("Failed to get password: {}", e)))?;

        Ok(password.to_string())
    }
}

impl EntryRemover for CredentialVaultStore {
    fn delete(&self, subject: &str) -> StoreResult<()> {
        debug!(resource = %self.resource_name, subject = %subject, "Deleting credential");

        let vault = self.vault()?;
        let credential = self.retrieve(&vault, subject)?;
        vault
            .Remove(&credential)
            .map_err(|e| StoreError::Unknown(format!("Failed to remove credential: {}", e)))
    }
}
