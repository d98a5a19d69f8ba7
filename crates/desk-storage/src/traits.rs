//! Storage capability traits.
//!
//! Writing, reading and removing are separate capabilities so a test double
//! (or a read-only consumer such as bootstrap verification) can depend on only
//! the operations it needs.

use crate::StoreResult;

/// Places new entries into the store.
pub trait EntryWriter: Send + Sync {
    /// Store `value` under `subject`.
    ///
    /// Fails with `DuplicateEntry` if the subject already holds a value; the
    /// existing value is left untouched.
    fn put(&self, subject: &str, value: &str) -> StoreResult<()>;
}

/// Reads entries from the store.
pub trait EntryReader: Send + Sync {
    /// Retrieve the value stored under `subject`.
    ///
    /// Fails with `MissingEntry` if nothing is stored or the payload is not
    /// UTF-8 text.
    fn get(&self, subject: &str) -> StoreResult<String>;

    /// Check whether an entry exists for `subject`.
    fn exists(&self, subject: &str) -> StoreResult<bool> {
        match self.get(subject) {
            Ok(_) => Ok(true),
            Err(e) if e.is_missing() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Removes entries from the store.
pub trait EntryRemover: Send + Sync {
    /// Delete the entry stored under `subject`.
    ///
    /// Fails with `MissingEntry` if there is nothing to delete.
    fn delete(&self, subject: &str) -> StoreResult<()>;
}

/// Full read/write/remove access to a secure store.
pub trait SecureKeyValueStore: EntryWriter + EntryReader + EntryRemover {}

impl<T: EntryWriter + EntryReader + EntryRemover + ?Sized> SecureKeyValueStore for T {}
