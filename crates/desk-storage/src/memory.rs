//! In-memory store.
//!
//! Used by tests and by platforms without a secure storage facility. It honours
//! the same duplicate-write policy as the keychain backends.

use crate::{EntryReader, EntryRemover, EntryWriter, StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local store with keychain semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl EntryWriter for MemoryStore {
    fn put(&self, subject: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(subject) {
            return Err(StoreError::DuplicateEntry(subject.to_string()));
        }
        entries.insert(subject.to_string(), value.to_string());
        Ok(())
    }
}

impl EntryReader for MemoryStore {
    fn get(&self, subject: &str) -> StoreResult<String> {
        self.entries
            .lock()
            .get(subject)
            .cloned()
            .ok_or_else(|| StoreError::MissingEntry(subject.to_string()))
    }

    fn exists(&self, subject: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().contains_key(subject))
    }
}

impl EntryRemover for MemoryStore {
    fn delete(&self, subject: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .remove(subject)
            .map(|_| ())
            .ok_or_else(|| StoreError::MissingEntry(subject.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreSubjects;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put("test_key", "test_value").unwrap();
        assert_eq!(store.get("test_key").unwrap(), "test_value");
        assert!(store.exists("test_key").unwrap());
        assert!(!store.exists("nonexistent").unwrap());

        store.delete("test_key").unwrap();
        assert_eq!(
            store.delete("test_key"),
            Err(StoreError::MissingEntry("test_key".to_string()))
        );
        assert!(store.get("test_key").unwrap_err().is_missing());
    }

    #[test]
    fn test_duplicate_write_keeps_first_value() {
        let store = MemoryStore::new();
        let subject = StoreSubjects::SESSION_IDENTITY;

        store.put(subject, "first").unwrap();
        let err = store.put(subject, "second").unwrap_err();

        assert_eq!(err, StoreError::DuplicateEntry(subject.to_string()));
        assert_eq!(store.get(subject).unwrap(), "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_then_put_replaces() {
        let store = MemoryStore::new();

        store.put("k", "old").unwrap();
        store.delete("k").unwrap();
        store.put("k", "new").unwrap();

        assert_eq!(store.get("k").unwrap(), "new");
    }

    #[test]
    fn test_concurrent_puts_admit_exactly_one() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.put("race", &format!("writer-{}", i)).is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
