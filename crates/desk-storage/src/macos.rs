//! macOS Keychain implementation.

use crate::{EntryReader, EntryRemover, EntryWriter, StoreError, StoreResult};
use core_foundation::base::TCFType;
use core_foundation::data::CFData;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use security_framework::item::{ItemClass, ItemSearchOptions, Limit, SearchResult};
use security_framework::passwords::delete_generic_password;
use security_framework_sys::item::{
    kSecAttrAccount, kSecAttrService, kSecClass, kSecClassGenericPassword, kSecValueData,
};
use security_framework_sys::keychain_item::SecItemAdd;
use tracing::debug;

const ERR_SEC_SUCCESS: i32 = 0;
const ERR_SEC_PARAM: i32 = -50;
const ERR_SEC_DUPLICATE_KEYCHAIN: i32 = -25296;
const ERR_SEC_DUPLICATE_ITEM: i32 = -25299;
const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// Map a Security framework status onto the store taxonomy.
///
/// Both duplicate codes are treated as a duplicate entry.
fn map_status(status: i32, subject: &str, operation: &str) -> StoreError {
    match status {
        ERR_SEC_DUPLICATE_ITEM | ERR_SEC_DUPLICATE_KEYCHAIN => {
            StoreError::DuplicateEntry(subject.to_string())
        }
        ERR_SEC_ITEM_NOT_FOUND => StoreError::MissingEntry(subject.to_string()),
        ERR_SEC_PARAM => {
            StoreError::IllegalArgument(format!("{} rejected query for {}", operation, subject))
        }
        other => StoreError::Unknown(format!(
            "{} failed for {} (OSStatus {})",
            operation, subject, other
        )),
    }
}

/// Keychain-based secure storage for macOS.
pub struct KeychainStore {
    service_name: String,
}

impl KeychainStore {
    /// Create a new Keychain store instance.
    pub fn new(service_name: &str) -> StoreResult<Self> {
        if service_name.is_empty() {
            return Err(StoreError::IllegalArgument(
                "Keychain service name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    /// Search keychain returning raw bytes.
    fn search_keychain_bytes(&self, subject: &str) -> StoreResult<Vec<u8>> {
        let mut search = ItemSearchOptions::new();
        search
            .class(ItemClass::generic_password())
            .service(&self.service_name)
            .account(subject)
            .limit(Limit::Max(1))
            .load_data(true);

        match search.search() {
            Ok(results) => match results.into_iter().next() {
                Some(SearchResult::Data(data)) => Ok(data),
                Some(_) => Err(StoreError::TypeMismatch(format!(
                    "Keychain item for {} did not return data",
                    subject
                ))),
                None => Err(StoreError::MissingEntry(subject.to_string())),
            },
            Err(e) => Err(map_status(e.code(), subject, "SecItemCopyMatching")),
        }
    }
}

impl EntryWriter for KeychainStore {
    fn put(&self, subject: &str, value: &str) -> StoreResult<()> {
        debug!(service = %self.service_name, subject = %subject, "Adding keychain item");

        // SecItemAdd never updates an existing item, which is the write policy
        // we want; the high-level password helpers silently update instead.
        let query = unsafe {
            CFDictionary::from_CFType_pairs(&[
                (
                    CFString::wrap_under_get_rule(kSecClass).as_CFType(),
                    CFString::wrap_under_get_rule(kSecClassGenericPassword).as_CFType(),
                ),
                (
                    CFString::wrap_under_get_rule(kSecAttrService).as_CFType(),
                    CFString::new(&self.service_name).as_CFType(),
                ),
                (
                    CFString::wrap_under_get_rule(kSecAttrAccount).as_CFType(),
                    CFString::new(subject).as_CFType(),
                ),
                (
                    CFString::wrap_under_get_rule(kSecValueData).as_CFType(),
                    CFData::from_buffer(value.as_bytes()).as_CFType(),
                ),
            ])
        };

        let status = unsafe { SecItemAdd(query.as_concrete_TypeRef(), std::ptr::null_mut()) };
        if status == ERR_SEC_SUCCESS {
            Ok(())
        } else {
            Err(map_status(status, subject, "SecItemAdd"))
        }
    }
}

impl EntryReader for KeychainStore {
    fn get(&self, subject: &str) -> StoreResult<String> {
        debug!(service = %self.service_name, subject = %subject, "Getting keychain item");
        let data = self.search_keychain_bytes(subject)?;
        // Non-text payloads are not something this client wrote.
        String::from_utf8(data).map_err(|_| StoreError::MissingEntry(subject.to_string()))
    }
}

impl EntryRemover for KeychainStore {
    fn delete(&self, subject: &str) -> StoreResult<()> {
        debug!(service = %self.service_name, subject = %subject, "Deleting keychain item");

        delete_generic_password(&self.service_name, subject)
            .map_err(|e| map_status(e.code(), subject, "SecItemDelete"))
    }
}
